// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [treetest](https://crates.io/crates/treetest-cli), a test
//! orchestrator for large platform source trees.
//!
//! The flow of one invocation: user references are resolved against the
//! [module index](module_index) by an ordered list of [finders](finder) into
//! [descriptors](descriptor); the [build driver](build) produces the needed
//! artifacts; the [harness supervisor](harness) spawns the external test
//! harness and pumps its event stream into the [reporter].

pub mod avd;
pub mod build;
pub mod cmd_cache;
pub mod descriptor;
pub mod errors;
pub mod finder;
pub mod harness;
mod helpers;
pub mod mapping;
pub mod module_index;
pub mod options;
pub mod reporter;
pub mod resolver;
pub mod run_store;
pub mod signal;
mod time;
pub mod tree_env;
pub mod user_config;
