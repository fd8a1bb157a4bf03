// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-invocation options bundle.
//!
//! [`RunOptions`] is constructed once from the CLI and passed by reference;
//! subsystems never write back. The one exception is the resolver, which may
//! return an updated copy with `host` set implicitly when every resolved test
//! is host-only.

use std::time::Duration;

/// The retry strategy passed through to the harness.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryStrategy {
    /// Run every test N times.
    Iterations(usize),
    /// Rerun the whole selection until something fails, at most N times.
    RerunUntilFailure(usize),
    /// Retry any failed test, at most N times.
    RetryAnyFailure(usize),
}

impl RetryStrategy {
    /// The harness-side name of the strategy.
    pub fn harness_name(&self) -> &'static str {
        match self {
            RetryStrategy::Iterations(_) => "ITERATIONS",
            RetryStrategy::RerunUntilFailure(_) => "RERUN_UNTIL_FAILURE",
            RetryStrategy::RetryAnyFailure(_) => "RETRY_ANY_FAILURE",
        }
    }

    /// The maximum run count for the strategy.
    pub fn max_run_count(&self) -> usize {
        match self {
            RetryStrategy::Iterations(n)
            | RetryStrategy::RerunUntilFailure(n)
            | RetryStrategy::RetryAnyFailure(n) => *n,
        }
    }
}

/// Options for one treetest invocation, immutable once constructed.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Force the host variant; fail if any resolved test is device-only.
    pub host: bool,
    /// Device serials passed through to the harness, one `--serial` each.
    pub serials: Vec<String>,
    /// Retry strategy and count, if any.
    pub retry: Option<RetryStrategy>,
    /// Resolve and report tests without executing them.
    pub collect_tests_only: bool,
    /// Skip harness teardown steps.
    pub disable_teardown: bool,
    /// Run against all ABIs.
    pub all_abi: bool,
    /// Run modules in instant-app parameterization.
    pub instant: bool,
    /// Run modules parameterized for the given user type.
    pub user_type: Option<String>,
    /// Per-test timeout in milliseconds.
    pub test_timeout_ms: Option<u64>,
    /// Extra include-filters for supported runner types.
    pub test_filters: Vec<String>,
    /// Annotation filters (illegal for TEST_MAPPING-produced tests).
    pub annotation_filters: Vec<String>,
    /// Do not restart the device as root.
    pub no_enable_root: bool,
    /// Shard count passed through to the harness.
    pub shard_count: Option<usize>,
    /// Retarget host unit tests to the bazel runner.
    pub bazel_mode: bool,
    /// A virtual device will be started before the run.
    pub start_avd: bool,
    /// Global wall-clock deadline for the whole run.
    pub max_run_time: Option<Duration>,
    /// Everything after a bare `--`, appended verbatim to the harness command.
    pub extra_harness_args: Vec<String>,
}

impl RunOptions {
    /// Names of set options that are illegal for descriptors produced from
    /// `TEST_MAPPING` entries. The set is resolver policy.
    pub fn mapping_illegal_options(&self) -> Vec<&'static str> {
        let mut illegal = Vec::new();
        if !self.annotation_filters.is_empty() {
            illegal.push("--annotation-filter");
        }
        if !self.test_filters.is_empty() {
            illegal.push("--test-filter");
        }
        if self.retry.is_some() {
            illegal.push("--iterations/--rerun-until-failure/--retry-any-failure");
        }
        illegal
    }

    /// Returns a copy with `host` set.
    pub fn with_host(&self) -> Self {
        Self {
            host: true,
            ..self.clone()
        }
    }
}
