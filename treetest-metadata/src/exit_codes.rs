// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `treetest` failures.
///
/// A treetest invocation may fail for a variety of reasons. This structure
/// documents the exit codes that occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum TreetestExitCode {}

impl TreetestExitCode {
    /// No errors occurred and treetest exited normally.
    pub const OK: i32 = 0;

    /// One or more test cases failed, or a module never closed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The platform build returned a non-zero exit code.
    pub const BUILD_FAILED: i32 = 101;

    /// At least one test reference resolved to zero descriptors.
    pub const TEST_NOT_FOUND: i32 = 102;

    /// The resolver found conflicting descriptors: an ambiguous class,
    /// disagreeing runners, or an impossible host/device combination.
    pub const RESOLVER_CONFLICT: i32 = 103;

    /// A device was required but none appeared available.
    pub const DEVICE_MISSING: i32 = 105;

    /// The harness subprocess exited before producing any event.
    pub const HARNESS_EXITED_EARLY: i32 = 106;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// Required environment variables were absent.
    pub const ENV_NOT_SET_UP: i32 = 96;

    /// treetest was invoked outside the platform source tree.
    pub const OUTSIDE_TREE: i32 = 95;

    /// `--verify-cmd-mapping` found a mismatch against the command cache.
    pub const VERIFY_FAILED: i32 = 94;

    /// A virtual device was requested but failed to come up.
    pub const AVD_FAILED: i32 = 93;
}
