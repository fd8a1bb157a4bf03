// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Optional user configuration from `<tree top>/.config/treetest.toml`.
//!
//! Everything here has a sensible default; flags and environment variables
//! always win over the file.

use crate::{errors::UserConfigError, tree_env::TreeEnv};
use camino::Utf8PathBuf;
use serde::Deserialize;

const CONFIG_FILE: &str = ".config/treetest.toml";

/// Defaults loaded from the user config file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct UserConfig {
    /// Override of the log-saver template passed to the harness.
    pub log_saver_template: Option<String>,
    /// Extra arguments always appended to the harness command.
    pub extra_harness_args: Vec<String>,
    /// Default global deadline for runs, in seconds.
    pub max_run_time_secs: Option<u64>,
}

impl UserConfig {
    /// Loads the config file if present; absent means defaults.
    pub fn load(env: &TreeEnv) -> Result<Self, UserConfigError> {
        Self::load_from(env.build_top().join(CONFIG_FILE))
    }

    fn load_from(config_file: Utf8PathBuf) -> Result<Self, UserConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(config_file.as_std_path()).required(false))
            .build()
            .map_err(|err| UserConfigError {
                config_file: config_file.clone(),
                err,
            })?;
        settings.try_deserialize().map_err(|err| UserConfigError {
            config_file,
            err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use indoc::indoc;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = UserConfig::load_from(dir.path().join("treetest.toml")).unwrap();
        assert_eq!(config.log_saver_template, None);
        assert!(config.extra_harness_args.is_empty());
    }

    #[test]
    fn file_values_parse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("treetest.toml");
        std::fs::write(
            &path,
            indoc! {r#"
                log-saver-template = "template/log/custom_saver"
                extra-harness-args = ["--no-early-device-release"]
                max-run-time-secs = 3600
            "#},
        )
        .unwrap();
        let config = UserConfig::load_from(path).unwrap();
        assert_eq!(
            config.log_saver_template.as_deref(),
            Some("template/log/custom_saver")
        );
        assert_eq!(config.extra_harness_args, vec!["--no-early-device-release"]);
        assert_eq!(config.max_run_time_secs, Some(3600));
    }
}
