// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result},
    output::{clap_styles, OutputContext, OutputOpts},
};
use clap::Parser;
use std::{
    collections::BTreeMap,
    io::{BufWriter, Write},
    time::Duration,
};
use tracing::info;
use treetest_metadata::TreetestExitCode;
use treetest_runner::{
    avd,
    build::BuildDriver,
    cmd_cache::{CmdCache, VerifyOutcome},
    descriptor::{RunnerKind, TestDescriptor},
    errors::{BuildError, ResolveError, WriteEventError},
    harness::{build_harness_command, HarnessSupervisor},
    mapping::TestMappings,
    module_index::ModuleIndex,
    options::{RetryStrategy, RunOptions},
    reporter::TestReporter,
    resolver::{ResolvedTests, Resolver},
    run_store::{RunRecord, RunStore},
    tree_env::TreeEnv,
    user_config::UserConfig,
};

/// A test orchestrator for large platform source trees.
///
/// Name one or more tests by module, class, method, file path or
/// TEST_MAPPING group; treetest figures out what to build, builds it, and
/// hands the tests to the platform harness.
#[derive(Debug, Parser)]
#[command(name = "treetest", version, styles = clap_styles::style())]
pub struct TreetestApp {
    #[command(flatten)]
    output: OutputOpts,

    /// Test references: module names, classes, methods, paths, mapping groups
    #[arg(value_name = "TESTS")]
    references: Vec<String>,

    /// Force the host variant; fail if any resolved test is device-only
    #[arg(long, help_heading = "MODE OPTIONS")]
    host: bool,

    /// Retarget host unit tests to the bazel runner
    #[arg(long, help_heading = "MODE OPTIONS")]
    bazel_mode: bool,

    /// Device serial to use (repeatable)
    #[arg(long, value_name = "SERIAL", help_heading = "DEVICE OPTIONS")]
    serial: Vec<String>,

    /// Start a virtual device before running
    #[arg(long, help_heading = "DEVICE OPTIONS")]
    start_avd: bool,

    /// Do not restart the device as root
    #[arg(long, help_heading = "DEVICE OPTIONS")]
    no_enable_root: bool,

    /// Run every test N times
    #[arg(
        long,
        value_name = "N",
        conflicts_with_all = ["rerun_until_failure", "retry_any_failure"],
        help_heading = "RETRY OPTIONS"
    )]
    iterations: Option<usize>,

    /// Rerun the selection until something fails, at most N times
    #[arg(
        long,
        value_name = "N",
        conflicts_with = "retry_any_failure",
        help_heading = "RETRY OPTIONS"
    )]
    rerun_until_failure: Option<usize>,

    /// Retry any failed test, at most N times
    #[arg(long, value_name = "N", help_heading = "RETRY OPTIONS")]
    retry_any_failure: Option<usize>,

    /// Resolve and report tests without executing them
    #[arg(long, help_heading = "RUNNER OPTIONS")]
    collect_tests_only: bool,

    /// Skip harness teardown steps
    #[arg(long, help_heading = "RUNNER OPTIONS")]
    disable_teardown: bool,

    /// Run against all ABIs
    #[arg(long, help_heading = "RUNNER OPTIONS")]
    all_abi: bool,

    /// Run modules in instant-app parameterization
    #[arg(long, help_heading = "RUNNER OPTIONS")]
    instant: bool,

    /// Run modules parameterized for the given user type
    #[arg(long, value_name = "TYPE", help_heading = "RUNNER OPTIONS")]
    user_type: Option<String>,

    /// Per-test timeout in milliseconds
    #[arg(long, value_name = "MS", help_heading = "RUNNER OPTIONS")]
    test_timeout: Option<u64>,

    /// Include-filter passed through to supported runners (repeatable)
    #[arg(long, value_name = "FILTER", help_heading = "RUNNER OPTIONS")]
    test_filter: Vec<String>,

    /// Annotation filter (repeatable; illegal for TEST_MAPPING tests)
    #[arg(long, value_name = "ANNOTATION", help_heading = "RUNNER OPTIONS")]
    annotation_filter: Vec<String>,

    /// Shard the run across N shards
    #[arg(long, value_name = "N", help_heading = "RUNNER OPTIONS")]
    sharding: Option<usize>,

    /// Global deadline for the whole run, in seconds
    #[arg(long, value_name = "SECS", help_heading = "RUNNER OPTIONS")]
    max_run_time: Option<u64>,

    /// Print the computed harness command(s); do not build or run
    #[arg(long, help_heading = "QUERY OPTIONS")]
    dry_run: bool,

    /// Print resolved module info for each test; do not build or run
    #[arg(long, help_heading = "QUERY OPTIONS")]
    info: bool,

    /// Print testable modules in the given suite; do not build or run
    #[arg(long, value_name = "SUITE", help_heading = "QUERY OPTIONS")]
    list_modules: Option<String>,

    /// Verify the resolved command against the command cache
    #[arg(long, conflicts_with = "update_cmd_mapping", help_heading = "QUERY OPTIONS")]
    verify_cmd_mapping: bool,

    /// Record the resolved command in the command cache
    #[arg(long, help_heading = "QUERY OPTIONS")]
    update_cmd_mapping: bool,

    /// Regenerate module-info unconditionally before resolving
    #[arg(long)]
    rebuild_module_info: bool,

    /// Everything after -- is appended verbatim to the harness command
    #[arg(last = true, value_name = "HARNESS ARGS")]
    extra_harness_args: Vec<String>,
}

impl TreetestApp {
    /// Executes the app.
    pub fn exec(self) -> Result<()> {
        let output = self.output.init();

        let env = TreeEnv::discover()?;
        let config = UserConfig::load(&env)?;

        // Zero references must fail before anything touches the build,
        // including a module-info rebuild.
        if self.references.is_empty() && self.list_modules.is_none() {
            return Err(ResolveError::NoReferences.into());
        }

        let driver = BuildDriver::new(&env);
        let index = ModuleIndex::load(&env, &driver, self.rebuild_module_info)?;

        if let Some(suite) = &self.list_modules {
            let stdout = std::io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            for module in index.testable_modules_in_suite(suite) {
                writeln!(writer, "{module}").map_err(WriteEventError::Io)?;
            }
            writer
                .flush()
                .map_err(WriteEventError::Io)?;
            return Ok(());
        }

        let mappings = TestMappings::discover(&env, env.current_dir())?;
        let options = self.to_run_options(&config);

        let resolver = Resolver::new(&env, &index, &mappings);
        let resolved = resolver.resolve(&self.references, &options)?;
        info!(
            "resolved {} test(s): {}",
            resolved.descriptors.len(),
            resolved
                .descriptors
                .iter()
                .map(|d| d.module.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        if self.info {
            return self.exec_info(&index, &resolved);
        }

        // The stable (pathless) command is what dry-run prints and what the
        // command cache records.
        let stable_command =
            build_harness_command(&env, &resolved.descriptors, &resolved.options, &config, None);

        if self.dry_run {
            println!("{}", stable_command.render());
            return Ok(());
        }
        if self.verify_cmd_mapping || self.update_cmd_mapping {
            return self.exec_cmd_mapping(&env, stable_command.render());
        }

        driver.build(&resolved.build_targets, &BTreeMap::new(), output.verbose)?;

        if self.start_avd {
            avd::start_avd(&env)?;
        }

        let (bazel, harness): (Vec<_>, Vec<_>) = resolved
            .descriptors
            .iter()
            .cloned()
            .partition(|d| d.runner == RunnerKind::Bazel);

        if !bazel.is_empty() {
            let modules: Vec<String> = bazel.iter().map(|d| d.module.clone()).collect();
            match driver.bazel_test(&modules) {
                Ok(_) => {}
                Err(BuildError::Failed { .. }) => {
                    return Err(ExpectedError::TestRunFailed);
                }
                Err(err) => return Err(err.into()),
            }
        }

        if harness.is_empty() {
            return Ok(());
        }

        self.exec_harness(&env, &config, &resolved, harness, output)
    }

    fn exec_info(&self, index: &ModuleIndex, resolved: &ResolvedTests) -> Result<()> {
        let stdout = std::io::stdout();
        let mut writer = BufWriter::new(stdout.lock());
        for descriptor in &resolved.descriptors {
            match index.get(&descriptor.module) {
                Some(info) => {
                    let json = serde_json::to_string_pretty(info)
                        .expect("module info is serializable");
                    writeln!(writer, "{json}")
                        .map_err(WriteEventError::Io)?;
                }
                None => {
                    writeln!(
                        writer,
                        "{}: resolved by the {} finder, not in the module index",
                        descriptor.module, descriptor.finder
                    )
                    .map_err(WriteEventError::Io)?;
                }
            }
        }
        writer
            .flush()
            .map_err(WriteEventError::Io)?;
        Ok(())
    }

    fn exec_cmd_mapping(&self, env: &TreeEnv, rendered: String) -> Result<()> {
        let mut cache = CmdCache::load(env)?;
        let key = CmdCache::key_for(&self.references);
        if self.update_cmd_mapping {
            cache.update(&self.references, &rendered)?;
            info!("recorded command for `{key}`");
            return Ok(());
        }
        match cache.verify(&self.references, &rendered) {
            VerifyOutcome::Match => {
                info!("command for `{key}` matches the cache");
                Ok(())
            }
            VerifyOutcome::Missing => Err(ExpectedError::VerifyMismatch {
                key,
                expected: "(no cached command)".to_owned(),
                actual: rendered,
            }),
            VerifyOutcome::Mismatch { expected } => Err(ExpectedError::VerifyMismatch {
                key,
                expected,
                actual: rendered,
            }),
        }
    }

    fn exec_harness(
        &self,
        env: &TreeEnv,
        config: &UserConfig,
        resolved: &ResolvedTests,
        descriptors: Vec<TestDescriptor>,
        output: OutputContext,
    ) -> Result<()> {
        let started_at = chrono::Utc::now();
        let store = RunStore::new(env)?;
        let run_paths = store.create_run(started_at)?;
        info!("results under {}", run_paths.dir);

        let command = build_harness_command(
            env,
            &descriptors,
            &resolved.options,
            config,
            Some(&run_paths),
        );

        let mut supervisor = HarnessSupervisor::new(command, run_paths.harness_log.clone())?;
        supervisor.set_deadline(resolved.options.max_run_time);

        let mut reporter = TestReporter::new();
        if output
            .color
            .should_colorize(supports_color::Stream::Stderr)
        {
            reporter.colorize();
        }

        let stderr = std::io::stderr();
        let mut writer = BufWriter::new(stderr.lock());
        let mut write_error = None;
        let outcome = supervisor.execute(|source, event| {
            if write_error.is_none() {
                if let Err(err) = reporter.report_event(source, event, &mut writer) {
                    write_error = Some(err);
                }
            }
        })?;
        if let Some(err) = write_error {
            return Err(err.into());
        }

        let stats = reporter.finalize(&mut writer)?;
        writer
            .flush()
            .map_err(WriteEventError::Io)?;

        let success = stats.is_success();
        let exit_code = if success {
            TreetestExitCode::OK
        } else {
            TreetestExitCode::TEST_RUN_FAILED
        };
        store.append_history(&RunRecord {
            started_at,
            references: self.references.clone(),
            passed: stats.passed,
            failed: stats.failed,
            ignored: stats.ignored,
            assumption_failed: stats.assumption_failed,
            incomplete: stats.incomplete,
            exit_code,
            duration_secs: (chrono::Utc::now() - started_at)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64(),
        })?;

        if let Some(code) = outcome.exit_code {
            if code != 0 {
                info!("harness exited with code {code}");
            }
        }

        if success {
            Ok(())
        } else {
            Err(ExpectedError::TestRunFailed)
        }
    }

    fn to_run_options(&self, config: &UserConfig) -> RunOptions {
        let retry = if let Some(n) = self.iterations {
            Some(RetryStrategy::Iterations(n))
        } else if let Some(n) = self.rerun_until_failure {
            Some(RetryStrategy::RerunUntilFailure(n))
        } else {
            self.retry_any_failure.map(RetryStrategy::RetryAnyFailure)
        };

        RunOptions {
            host: self.host,
            serials: self.serial.clone(),
            retry,
            collect_tests_only: self.collect_tests_only,
            disable_teardown: self.disable_teardown,
            all_abi: self.all_abi,
            instant: self.instant,
            user_type: self.user_type.clone(),
            test_timeout_ms: self.test_timeout,
            test_filters: self.test_filter.clone(),
            annotation_filters: self.annotation_filter.clone(),
            no_enable_root: self.no_enable_root,
            shard_count: self.sharding,
            bazel_mode: self.bazel_mode,
            start_avd: self.start_avd,
            max_run_time: self
                .max_run_time
                .or(config.max_run_time_secs)
                .map(Duration::from_secs),
            extra_harness_args: self.extra_harness_args.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_reference_and_flags() {
        let app = TreetestApp::parse_from([
            "treetest",
            "hello_world_test",
            "--dry-run",
            "--serial",
            "emulator-5554",
            "--iterations",
            "3",
        ]);
        assert_eq!(app.references, vec!["hello_world_test"]);
        assert!(app.dry_run);
        assert_eq!(app.serial, vec!["emulator-5554"]);
        assert_eq!(app.iterations, Some(3));
    }

    #[test]
    fn trailing_args_pass_through() {
        let app = TreetestApp::parse_from([
            "treetest",
            "a_test",
            "--",
            "--harness-only-flag",
            "value",
        ]);
        assert_eq!(app.extra_harness_args, vec!["--harness-only-flag", "value"]);
    }

    #[test]
    fn retry_flags_conflict() {
        let result = TreetestApp::try_parse_from([
            "treetest",
            "a_test",
            "--iterations",
            "2",
            "--rerun-until-failure",
            "3",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn retry_mapping() {
        let app = TreetestApp::parse_from(["treetest", "a", "--rerun-until-failure", "7"]);
        let options = app.to_run_options(&UserConfig::default());
        assert_eq!(options.retry, Some(RetryStrategy::RerunUntilFailure(7)));
    }
}
