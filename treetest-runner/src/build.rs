// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The build driver.
//!
//! The platform build is an opaque child process: this module computes
//! nothing, decides nothing, and simply runs the configured build command
//! with a closed target set, passing its output through to the user. It is
//! the only component permitted to exec the build system during a run,
//! except for the module-info bootstrap in [`crate::module_index`].

use crate::{errors::BuildError, time, tree_env::TreeEnv};
use std::{collections::BTreeMap, collections::BTreeSet, time::Duration};
use tracing::{debug, info};

/// The well-known target that regenerates module-info. Always prepended to
/// the target set.
pub const MODULE_INFO_TARGET: &str = "module-info";

/// Statistics for a completed build.
#[derive(Clone, Debug)]
pub struct BuildStats {
    /// Wall-clock duration of the build.
    pub duration: Duration,
    /// The targets that were built, in the order passed to the build system.
    pub targets: Vec<String>,
}

/// Drives the opaque platform build command.
#[derive(Clone, Debug)]
pub struct BuildDriver<'env> {
    env: &'env TreeEnv,
}

impl<'env> BuildDriver<'env> {
    /// Creates a build driver for the given tree.
    pub fn new(env: &'env TreeEnv) -> Self {
        Self { env }
    }

    /// Builds the given targets, prepending the module-info target. The
    /// child's stdout/stderr are passed through; `env_overlay` is forwarded
    /// verbatim for build variant selection.
    pub fn build(
        &self,
        targets: &BTreeSet<String>,
        env_overlay: &BTreeMap<String, String>,
        verbose: bool,
    ) -> Result<BuildStats, BuildError> {
        let mut args: Vec<String> = Vec::with_capacity(targets.len() + 2);
        if verbose {
            args.push("--verbose".to_owned());
        }
        args.push(MODULE_INFO_TARGET.to_owned());
        args.extend(targets.iter().filter(|t| *t != MODULE_INFO_TARGET).cloned());

        let rendered = self.render_command(&args);
        info!("building {} targets: {rendered}", args.len());

        let mut expression = duct::cmd(self.env.build_cmd().as_str(), &args)
            .dir(self.env.build_top());
        for (key, value) in env_overlay {
            expression = expression.env(key, value);
        }

        let stopwatch = time::stopwatch();
        let output = expression
            .unchecked()
            .run()
            .map_err(|err| BuildError::Exec {
                command: rendered.clone(),
                err,
            })?;
        let duration = stopwatch.snapshot().duration;

        if !output.status.success() {
            return Err(BuildError::Failed {
                command: rendered,
                exit_code: output.status.code(),
            });
        }

        debug!("build finished in {:.1}s", duration.as_secs_f64());
        Ok(BuildStats {
            duration,
            targets: args,
        })
    }

    /// Runs bazel-mode tests through the bazel launcher. This stays inside
    /// the build driver so no other component execs the build system.
    pub fn bazel_test(&self, modules: &[String]) -> Result<BuildStats, BuildError> {
        let mut args: Vec<String> = vec!["test".to_owned()];
        args.extend(modules.iter().cloned());

        let mut words = vec![self.env.bazel_cmd().to_string()];
        words.extend(args.iter().cloned());
        let rendered = shell_words::join(&words);
        info!("running bazel-mode tests: {rendered}");

        let stopwatch = time::stopwatch();
        let output = duct::cmd(self.env.bazel_cmd().as_str(), &args)
            .dir(self.env.build_top())
            .unchecked()
            .run()
            .map_err(|err| BuildError::Exec {
                command: rendered.clone(),
                err,
            })?;

        if !output.status.success() {
            return Err(BuildError::Failed {
                command: rendered,
                exit_code: output.status.code(),
            });
        }
        Ok(BuildStats {
            duration: stopwatch.snapshot().duration,
            targets: args,
        })
    }

    fn render_command(&self, args: &[String]) -> String {
        let mut words = vec![self.env.build_cmd().to_string()];
        words.extend(args.iter().cloned());
        shell_words::join(&words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_env::{BUILD_CMD_VAR, BUILD_TOP_VAR};
    use camino_tempfile::tempdir;
    use std::collections::HashMap;

    fn env_with_build_cmd(top: &camino::Utf8Path, cmd: &str) -> TreeEnv {
        let mut vars = HashMap::new();
        vars.insert(BUILD_TOP_VAR, top.to_string());
        vars.insert(BUILD_CMD_VAR, cmd.to_owned());
        TreeEnv::from_lookup(
            &move |name| vars.get(name).cloned(),
            top.to_path_buf(),
        )
        .unwrap()
    }

    #[test]
    #[cfg(unix)]
    fn successful_build_prepends_module_info() {
        let dir = tempdir().unwrap();
        let env = env_with_build_cmd(dir.path(), "true");
        let driver = BuildDriver::new(&env);
        let stats = driver
            .build(
                &["hello_world_test".to_owned()].into_iter().collect(),
                &BTreeMap::new(),
                false,
            )
            .unwrap();
        assert_eq!(stats.targets, vec![MODULE_INFO_TARGET, "hello_world_test"]);
    }

    #[test]
    #[cfg(unix)]
    fn failing_build_reports_exit_code() {
        let dir = tempdir().unwrap();
        let env = env_with_build_cmd(dir.path(), "false");
        let driver = BuildDriver::new(&env);
        let err = driver
            .build(&BTreeSet::new(), &BTreeMap::new(), false)
            .unwrap_err();
        match err {
            BuildError::Failed { exit_code, .. } => assert_eq!(exit_code, Some(1)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
