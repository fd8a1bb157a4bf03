// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use owo_colors::{OwoColorize, Stream};
use std::error::Error;
use thiserror::Error;
use treetest_metadata::TreetestExitCode;
use treetest_runner::errors::*;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// An expected, user-actionable failure with a documented exit code.
///
/// Note that the `#[error()]` strings are mostly summaries -- the expected
/// way to print out errors is with the `display_to_stderr` method, which
/// colorizes errors and walks their source chains.
#[derive(Debug, Error)]
pub enum ExpectedError {
    #[error(transparent)]
    TreeEnv(#[from] TreeEnvError),
    #[error(transparent)]
    UserConfig(#[from] UserConfigError),
    #[error(transparent)]
    ModuleIndex(#[from] ModuleIndexError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    RunStore(#[from] RunStoreError),
    #[error(transparent)]
    CmdCache(#[from] CmdCacheError),
    #[error(transparent)]
    Avd(#[from] AvdError),
    #[error(transparent)]
    WriteEvent(#[from] WriteEventError),
    #[error("resolved command differs from the cached command for `{key}`")]
    VerifyMismatch {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("one or more tests failed")]
    TestRunFailed,
}

impl ExpectedError {
    /// The documented process exit code for this error.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::TreeEnv(TreeEnvError::OutsideTree { .. }) => TreetestExitCode::OUTSIDE_TREE,
            Self::TreeEnv(_) | Self::UserConfig(_) => TreetestExitCode::ENV_NOT_SET_UP,
            Self::ModuleIndex(_) => TreetestExitCode::BUILD_FAILED,
            Self::Mapping(_) => TreetestExitCode::RESOLVER_CONFLICT,
            Self::Resolve(err) => match err {
                ResolveError::NoReferences | ResolveError::TestNotFound { .. } => {
                    TreetestExitCode::TEST_NOT_FOUND
                }
                ResolveError::DeviceMissing { .. } => TreetestExitCode::DEVICE_MISSING,
                ResolveError::Index(_) => TreetestExitCode::BUILD_FAILED,
                _ => TreetestExitCode::RESOLVER_CONFLICT,
            },
            Self::Build(_) => TreetestExitCode::BUILD_FAILED,
            Self::Supervisor(SupervisorError::ExitedEarly { .. }) => {
                TreetestExitCode::HARNESS_EXITED_EARLY
            }
            Self::Supervisor(_) => 1,
            Self::RunStore(_) | Self::CmdCache(_) | Self::WriteEvent(_) => {
                TreetestExitCode::WRITE_OUTPUT_ERROR
            }
            Self::Avd(_) => TreetestExitCode::AVD_FAILED,
            Self::VerifyMismatch { .. } => TreetestExitCode::VERIFY_FAILED,
            Self::TestRunFailed => TreetestExitCode::TEST_RUN_FAILED,
        }
    }

    /// Prints one actionable line to stderr, plus whatever context helps.
    pub fn display_to_stderr(&self) {
        eprintln!(
            "{}: {self}",
            "error".if_supports_color(Stream::Stderr, |s| s.bold().red().to_string())
        );

        // Walk the source chain for context.
        let mut source = self.source();
        while let Some(err) = source {
            eprintln!(
                "  {} {err}",
                "caused by:".if_supports_color(Stream::Stderr, |s| s.bold().to_string())
            );
            source = err.source();
        }

        // Special cases that carry extra user-facing payload.
        match self {
            Self::Supervisor(SupervisorError::ExitedEarly { log_tail, .. }) => {
                if !log_tail.is_empty() {
                    eprintln!("last lines of the harness log:");
                    for line in log_tail {
                        eprintln!("  {line}");
                    }
                }
            }
            Self::VerifyMismatch {
                key,
                expected,
                actual,
            } => {
                eprintln!("references: {key}");
                eprintln!("  cached:   {expected}");
                eprintln!("  resolved: {actual}");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        let err = ExpectedError::Resolve(ResolveError::TestNotFound {
            reference: "nope".to_owned(),
        });
        assert_eq!(err.process_exit_code(), TreetestExitCode::TEST_NOT_FOUND);

        let err = ExpectedError::Resolve(ResolveError::NoReferences);
        assert_eq!(err.process_exit_code(), TreetestExitCode::TEST_NOT_FOUND);

        let err = ExpectedError::Supervisor(SupervisorError::ExitedEarly {
            exit_code: Some(2),
            log_tail: vec![],
        });
        assert_eq!(
            err.process_exit_code(),
            TreetestExitCode::HARNESS_EXITED_EARLY
        );

        let err = ExpectedError::TestRunFailed;
        assert_eq!(err.process_exit_code(), TreetestExitCode::TEST_RUN_FAILED);
    }
}
