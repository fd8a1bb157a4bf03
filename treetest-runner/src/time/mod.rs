// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time tracking for runs.

mod stopwatch;

pub(crate) use stopwatch::*;
