// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The harness supervisor.
//!
//! Spawns the external test-harness subprocess once per run, accepts its
//! inbound event connections on a loopback endpoint, drives them to
//! completion, and surfaces subprocess failure distinctly from test failure.

mod args;
mod events;
mod supervisor;

pub use args::*;
pub use events::*;
pub use supervisor::*;
