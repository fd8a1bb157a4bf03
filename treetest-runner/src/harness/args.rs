// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Harness argument construction.
//!
//! Builds the argument vector for the external harness from descriptors,
//! filters and options. The output is deterministic: descriptors arrive
//! sorted from the resolver and flags are emitted in a fixed order, so two
//! dry-runs over the same inputs print byte-identical commands.

use crate::{
    descriptor::{FinderKind, TestDescriptor},
    options::RunOptions,
    run_store::RunPaths,
    tree_env::TreeEnv,
    user_config::UserConfig,
};
use camino::Utf8PathBuf;

/// The default log-saver template passed to the harness.
pub const LOG_SAVER_TEMPLATE: &str = "template/log/local_log_saver";

/// Default per-test timeout for TEST_MAPPING runs, in milliseconds.
pub const MAPPING_TEST_TIMEOUT_MS: u64 = 600_000;

/// A fully computed harness invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HarnessCommand {
    /// The harness launcher.
    pub program: Utf8PathBuf,
    /// The argument vector, without the report port (the supervisor appends
    /// it at spawn time).
    pub args: Vec<String>,
}

impl HarnessCommand {
    /// Renders the command as a single shell-quoted line.
    pub fn render(&self) -> String {
        let mut words = vec![self.program.to_string()];
        words.extend(self.args.iter().cloned());
        shell_words::join(&words)
    }
}

/// Builds the harness command for the given descriptors and options.
///
/// `run_paths` is `None` for dry runs, which omits the per-invocation log
/// paths so the printed command is stable across invocations.
pub fn build_harness_command(
    env: &TreeEnv,
    descriptors: &[TestDescriptor],
    options: &RunOptions,
    config: &UserConfig,
    run_paths: Option<&RunPaths>,
) -> HarnessCommand {
    let mut args: Vec<String> = Vec::new();
    let push = |args: &mut Vec<String>, s: &str| args.push(s.to_owned());

    push(&mut args, "run");
    push(&mut args, "commandAndExit");
    push(&mut args, "template/local");
    push(&mut args, "--template:map");
    args.push(format!(
        "log_saver={}",
        config.log_saver_template.as_deref().unwrap_or(LOG_SAVER_TEMPLATE)
    ));

    for descriptor in descriptors {
        push(&mut args, "--include-filter");
        args.push(descriptor.module.clone());
        for filter in &descriptor.filters {
            push(&mut args, "--harness-include-filter");
            args.push(format!("{}:{filter}", descriptor.module));
        }
        for (key, value) in &descriptor.module_args {
            push(&mut args, "--module-arg");
            args.push(format!("{}:{key}:{value}", descriptor.module));
        }
    }

    // Integration configs live inside the harness's own config jars; only
    // skip the scan when nothing came from the integration finder.
    if descriptors
        .iter()
        .all(|d| d.finder != FinderKind::Integration)
    {
        push(&mut args, "--skip-loading-config-jar");
    }

    if options.host {
        push(&mut args, "--prioritize-host-config");
    }

    let serials: Vec<&str> = if options.serials.is_empty() {
        env.serial().into_iter().collect()
    } else {
        options.serials.iter().map(String::as_str).collect()
    };
    for serial in serials {
        push(&mut args, "--serial");
        push(&mut args, serial);
    }

    if let Some(retry) = options.retry {
        push(&mut args, "--retry-strategy");
        push(&mut args, retry.harness_name());
        push(&mut args, "--max-testcase-run-count");
        args.push(retry.max_run_count().to_string());
    }

    if options.collect_tests_only {
        push(&mut args, "--collect-tests-only");
    }
    if options.disable_teardown {
        push(&mut args, "--disable-teardown");
    }
    if options.all_abi {
        push(&mut args, "--all-abi");
    }

    if options.instant {
        push(&mut args, "--enable-parameterized-modules");
        push(&mut args, "--module-parameter");
        push(&mut args, "instant_app");
    }
    if let Some(user_type) = &options.user_type {
        push(&mut args, "--enable-parameterized-modules");
        push(&mut args, "--module-parameter");
        push(&mut args, user_type);
    }

    let timeout = options.test_timeout_ms.or_else(|| {
        descriptors
            .iter()
            .any(|d| d.from_mapping)
            .then_some(MAPPING_TEST_TIMEOUT_MS)
    });
    if let Some(timeout) = timeout {
        push(&mut args, "--test-timeout");
        args.push(timeout.to_string());
    }

    for filter in &options.test_filters {
        push(&mut args, "--test-filter");
        push(&mut args, filter);
    }
    for annotation in &options.annotation_filters {
        push(&mut args, "--annotation-filter");
        push(&mut args, annotation);
    }

    if options.no_enable_root {
        push(&mut args, "--no-enable-root");
    }
    if let Some(shards) = options.shard_count {
        push(&mut args, "--shard-count");
        args.push(shards.to_string());
    }

    if let Some(paths) = run_paths {
        push(&mut args, "--log-file-path");
        args.push(paths.dir.to_string());
        push(&mut args, "--proto-output-file");
        args.push(paths.proto_result.to_string());
    }

    args.extend(config.extra_harness_args.iter().cloned());
    args.extend(options.extra_harness_args.iter().cloned());

    HarnessCommand {
        program: env.harness_cmd().to_owned(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        descriptor::{RunnerKind, TestFilter},
        options::RetryStrategy,
        tree_env::{BUILD_TOP_VAR, SERIAL_VAR},
    };
    use pretty_assertions::assert_eq;

    fn tree_env(serial: Option<&str>) -> TreeEnv {
        let serial = serial.map(str::to_owned);
        let lookup = move |name: &'static str| match name {
            BUILD_TOP_VAR => Some("/src/tree".to_owned()),
            SERIAL_VAR => serial.clone(),
            _ => None,
        };
        TreeEnv::from_lookup(&lookup, "/src/tree".into()).unwrap()
    }

    fn whole_module(name: &str) -> TestDescriptor {
        TestDescriptor::new(name, RunnerKind::Harness, FinderKind::Module)
    }

    #[test]
    fn whole_module_command_contains_filter_and_log_saver() {
        let env = tree_env(None);
        let command = build_harness_command(
            &env,
            &[whole_module("hello_world_test")],
            &RunOptions::default(),
            &UserConfig::default(),
            None,
        );
        let rendered = command.render();
        assert!(rendered.contains("--include-filter hello_world_test"), "{rendered}");
        assert!(rendered.contains(LOG_SAVER_TEMPLATE), "{rendered}");
        assert!(rendered.contains("--skip-loading-config-jar"), "{rendered}");
    }

    #[test]
    fn dry_run_output_is_stable() {
        let env = tree_env(None);
        let descriptors = [whole_module("a_test"), whole_module("b_test")];
        let options = RunOptions::default();
        let config = UserConfig::default();
        let first = build_harness_command(&env, &descriptors, &options, &config, None);
        let second = build_harness_command(&env, &descriptors, &options, &config, None);
        assert_eq!(first.render(), second.render());
    }

    #[test]
    fn class_filters_render_with_module_prefix() {
        let env = tree_env(None);
        let descriptor = whole_module("foo_tests")
            .with_filter(TestFilter::methods("FooTest", ["a", "b"]));
        let command = build_harness_command(
            &env,
            &[descriptor],
            &RunOptions::default(),
            &UserConfig::default(),
            None,
        );
        assert!(command
            .args
            .windows(2)
            .any(|w| w == ["--harness-include-filter", "foo_tests:FooTest#a,b"]));
    }

    #[test]
    fn integration_descriptor_keeps_config_jar_scan() {
        let env = tree_env(None);
        let descriptor = TestDescriptor::new(
            "some-suite",
            RunnerKind::Harness,
            FinderKind::Integration,
        );
        let command = build_harness_command(
            &env,
            &[descriptor],
            &RunOptions::default(),
            &UserConfig::default(),
            None,
        );
        assert!(!command.args.iter().any(|a| a == "--skip-loading-config-jar"));
    }

    #[test]
    fn serial_env_var_applies_when_no_flag_given() {
        let env = tree_env(Some("emulator-5554"));
        let command = build_harness_command(
            &env,
            &[whole_module("a_test")],
            &RunOptions::default(),
            &UserConfig::default(),
            None,
        );
        assert!(command
            .args
            .windows(2)
            .any(|w| w == ["--serial", "emulator-5554"]));

        // An explicit flag wins over the environment.
        let options = RunOptions {
            serials: vec!["device-1".to_owned()],
            ..RunOptions::default()
        };
        let command = build_harness_command(
            &env,
            &[whole_module("a_test")],
            &options,
            &UserConfig::default(),
            None,
        );
        assert!(command.args.windows(2).any(|w| w == ["--serial", "device-1"]));
        assert!(!command
            .args
            .windows(2)
            .any(|w| w == ["--serial", "emulator-5554"]));
    }

    #[test]
    fn retry_strategy_and_mapping_timeout() {
        let env = tree_env(None);
        let mapped = whole_module("mapped_test").from_mapping(false);
        let options = RunOptions {
            retry: Some(RetryStrategy::RerunUntilFailure(5)),
            ..RunOptions::default()
        };
        let command = build_harness_command(
            &env,
            &[mapped],
            &options,
            &UserConfig::default(),
            None,
        );
        let args = &command.args;
        assert!(args.windows(2).any(|w| w == ["--retry-strategy", "RERUN_UNTIL_FAILURE"]));
        assert!(args.windows(2).any(|w| w == ["--max-testcase-run-count", "5"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["--test-timeout", &MAPPING_TEST_TIMEOUT_MS.to_string()]));
    }

    #[test]
    fn extra_args_come_last() {
        let env = tree_env(None);
        let options = RunOptions {
            extra_harness_args: vec!["--harness-arg".to_owned(), "value".to_owned()],
            ..RunOptions::default()
        };
        let command = build_harness_command(
            &env,
            &[whole_module("a_test")],
            &options,
            &UserConfig::default(),
            None,
        );
        assert_eq!(
            command.args[command.args.len() - 2..],
            ["--harness-arg".to_owned(), "value".to_owned()]
        );
    }
}
