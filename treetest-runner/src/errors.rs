// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by treetest.

use crate::descriptor::RunnerKind;
use camino::Utf8PathBuf;
use std::fmt;
use thiserror::Error;

/// An error that occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);

/// An error that occurred while discovering the platform tree environment.
#[derive(Debug, Error)]
pub enum TreeEnvError {
    /// A required environment variable was absent.
    #[error("required environment variable `{name}` is not set (run the tree's setup script first)")]
    MissingVar {
        /// The name of the missing variable.
        name: &'static str,
    },

    /// The current directory is not inside the source tree.
    #[error("current directory `{current_dir}` is outside the source tree rooted at `{build_top}`")]
    OutsideTree {
        /// The configured tree root.
        build_top: Utf8PathBuf,
        /// The invocation directory.
        current_dir: Utf8PathBuf,
    },

    /// An environment variable held a non-UTF-8 path.
    #[error("environment variable `{name}` is not valid UTF-8")]
    InvalidPath {
        /// The name of the offending variable.
        name: &'static str,
    },

    /// The current directory could not be determined.
    #[error("failed to read current directory")]
    CurrentDir(#[source] std::io::Error),
}

/// An error that occurred while loading `.config/treetest.toml`.
#[derive(Debug, Error)]
#[error("failed to parse user config at `{config_file}`")]
pub struct UserConfigError {
    pub(crate) config_file: Utf8PathBuf,
    #[source]
    pub(crate) err: config::ConfigError,
}

/// An error that occurred while loading or rebuilding the module-info index.
#[derive(Debug, Error)]
pub enum ModuleIndexError {
    /// Scanning the tree for build-definition files failed.
    #[error("failed to scan the source tree for build files")]
    Scan(#[source] walkdir::Error),

    /// The rebuild through the build driver failed. There is no fallback.
    #[error("failed to regenerate module-info")]
    Rebuild(#[from] BuildError),

    /// The generated module-info JSON could not be read.
    #[error("failed to read module-info at `{path}`")]
    Read {
        /// The path that failed to read.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The module-info JSON was malformed.
    #[error("failed to parse module-info at `{path}`")]
    Parse {
        /// The path that failed to parse.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// The derived cache or its checksum sidecar could not be written.
    #[error("failed to persist module index cache at `{path}`")]
    Persist {
        /// The cache path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

/// An error that occurred while reading a `TEST_MAPPING` file.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The file could not be read.
    #[error("failed to read `{path}`")]
    Read {
        /// The mapping file path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The file was not valid JSON after comment stripping.
    #[error("failed to parse `{path}`")]
    Parse {
        /// The mapping file path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },
}

/// An error returned by a single finder.
///
/// `NotMine` means the reference is outside this finder's namespace and the
/// resolver should fall through to the next finder. Every other variant is
/// fatal and terminates resolution.
#[derive(Debug, Error)]
pub enum FinderError {
    /// The reference is not in this finder's namespace.
    #[error("reference not recognized by this finder")]
    NotMine,

    /// A class name matched source files in more than one module.
    #[error(
        "class `{class}` is ambiguous; candidates: {}",
        candidates.join(", ")
    )]
    AmbiguousClass {
        /// The class reference.
        class: String,
        /// The modules that define it.
        candidates: Vec<String>,
    },

    /// A `TEST_MAPPING` file failed to load.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// A filesystem error while scanning for sources or configs.
    #[error("I/O error under `{path}`")]
    Io {
        /// The path being scanned.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

impl FinderError {
    /// Returns true if the resolver should fall through to the next finder.
    pub fn is_not_mine(&self) -> bool {
        matches!(self, FinderError::NotMine)
    }
}

/// An error produced while resolving user references into descriptors.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No references were supplied.
    #[error("no test references given")]
    NoReferences,

    /// A reference resolved to zero descriptors across all finders.
    #[error("no test found for reference `{reference}`")]
    TestNotFound {
        /// The unresolved reference.
        reference: String,
    },

    /// Two descriptors for the same module disagree on the runner.
    #[error("module `{module}` resolved to both the {left} and {right} runners")]
    RunnerMismatch {
        /// The module with disagreeing descriptors.
        module: String,
        /// One runner.
        left: RunnerKind,
        /// The other runner.
        right: RunnerKind,
    },

    /// Host-only and device-only tests cannot run in one invocation.
    #[error(
        "impossible host/device combination: host-only [{}], device-only [{}]",
        host_only.join(", "),
        device_only.join(", ")
    )]
    ModeConflict {
        /// Modules that only run on host.
        host_only: Vec<String>,
        /// Modules that only run on a device.
        device_only: Vec<String>,
    },

    /// `--host` was given but some resolved tests are device-only.
    #[error(
        "--host was given but these modules are device-only: {}",
        modules.join(", ")
    )]
    DeviceOnlyWithHost {
        /// The offending modules.
        modules: Vec<String>,
    },

    /// A device is required but none appears available.
    #[error(
        "a device is required by [{}] but none appears available (set a serial or pass --host)",
        modules.join(", ")
    )]
    DeviceMissing {
        /// Modules that need a device.
        modules: Vec<String>,
    },

    /// An option that is illegal for TEST_MAPPING-produced tests was given.
    #[error("option `{option}` cannot be used with TEST_MAPPING tests")]
    MappingIllegalOption {
        /// The offending option.
        option: &'static str,
    },

    /// A finder failed fatally while handling a reference.
    #[error("failed to resolve `{reference}`")]
    Finder {
        /// The reference being resolved.
        reference: String,
        /// The finder's error.
        #[source]
        err: FinderError,
    },

    /// The module index failed to load.
    #[error(transparent)]
    Index(#[from] ModuleIndexError),
}

/// An error that occurred while driving the platform build.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build command could not be spawned.
    #[error("failed to execute build command `{command}`")]
    Exec {
        /// The rendered command.
        command: String,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The build ran and returned a non-zero exit code.
    #[error("build command `{command}` failed{}", display_exit_code(*exit_code))]
    Failed {
        /// The rendered command.
        command: String,
        /// The exit code, if the child exited normally.
        exit_code: Option<i32>,
    },
}

/// An error that occurred inside the harness supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The tokio runtime could not be created.
    #[error("failed to create async runtime")]
    RuntimeCreate(#[source] std::io::Error),

    /// Signal handler setup failed.
    #[error(transparent)]
    SignalSetup(#[from] SignalHandlerSetupError),

    /// The loopback event endpoint could not be bound.
    #[error("failed to bind event endpoint on loopback")]
    Bind(#[source] std::io::Error),

    /// The harness log file could not be created.
    #[error("failed to create harness log at `{path}`")]
    LogCreate {
        /// The log path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The harness subprocess could not be spawned.
    #[error("failed to spawn harness command `{command}`")]
    Spawn {
        /// The rendered command.
        command: String,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// Waiting on the harness subprocess failed.
    #[error("failed to wait on the harness subprocess")]
    ChildWait(#[source] std::io::Error),

    /// The harness exited before producing any event.
    #[error("harness exited{} before producing any event", display_exit_code(*exit_code))]
    ExitedEarly {
        /// The child's exit code, if it exited normally.
        exit_code: Option<i32>,
        /// The last lines of the harness log, for the user-visible report.
        log_tail: Vec<String>,
    },
}

/// An error that occurred while managing the per-invocation results directory.
#[derive(Debug, Error)]
pub enum RunStoreError {
    /// The results directory could not be created.
    #[error("failed to create results directory `{path}`")]
    Create {
        /// The directory path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The history index could not be written.
    #[error("failed to write run history at `{path}`")]
    Write {
        /// The history file path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

/// An error that occurred while reading or writing the command cache.
#[derive(Debug, Error)]
pub enum CmdCacheError {
    /// The cache file could not be read.
    #[error("failed to read command cache at `{path}`")]
    Read {
        /// The cache path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The cache file was malformed.
    #[error("failed to parse command cache at `{path}`")]
    Parse {
        /// The cache path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// The cache file could not be written.
    #[error("failed to write command cache at `{path}`")]
    Write {
        /// The cache path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

/// An error that occurred while starting a virtual device.
#[derive(Debug, Error)]
pub enum AvdError {
    /// `--start-avd` was given but no launcher is configured.
    #[error("--start-avd requires the PLATFORM_AVD_CMD environment variable")]
    NotConfigured,

    /// The AVD launcher could not be spawned.
    #[error("failed to execute AVD launcher `{command}`")]
    Exec {
        /// The rendered command.
        command: String,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The AVD launcher returned a non-zero exit code.
    #[error("AVD launcher `{command}` failed{}", display_exit_code(*exit_code))]
    Failed {
        /// The rendered command.
        command: String,
        /// The exit code, if the child exited normally.
        exit_code: Option<i32>,
    },
}

/// An error that occurred while writing a reporter line.
#[derive(Debug, Error)]
pub enum WriteEventError {
    /// An error occurred while writing to the output stream.
    #[error("error writing to output")]
    Io(#[from] std::io::Error),
}

fn display_exit_code(exit_code: Option<i32>) -> DisplayExitCode {
    DisplayExitCode(exit_code)
}

struct DisplayExitCode(Option<i32>);

impl fmt::Display for DisplayExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, " with exit code {code}"),
            None => write!(f, " due to a signal"),
        }
    }
}
