// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The platform tree environment.
//!
//! The original orchestrator kept this state in a process-global; here it is
//! resolved once into an owned [`TreeEnv`] value and threaded explicitly
//! through the resolver, build driver and supervisor.

use crate::errors::TreeEnvError;
use camino::{Utf8Path, Utf8PathBuf};

/// Environment variable naming the source tree root.
pub const BUILD_TOP_VAR: &str = "PLATFORM_BUILD_TOP";
/// Environment variable naming the build output directory.
pub const OUT_DIR_VAR: &str = "PLATFORM_OUT_DIR";
/// Environment variable naming the host artifact directory.
pub const HOST_OUT_VAR: &str = "PLATFORM_HOST_OUT";
/// Environment variable naming the device artifact directory.
pub const PRODUCT_OUT_VAR: &str = "PLATFORM_PRODUCT_OUT";
/// Environment variable selecting a device serial when no `--serial` is given.
pub const SERIAL_VAR: &str = "PLATFORM_SERIAL";
/// Environment variable overriding the opaque build command.
pub const BUILD_CMD_VAR: &str = "PLATFORM_BUILD_CMD";
/// Environment variable overriding the harness launcher.
pub const HARNESS_VAR: &str = "PLATFORM_HARNESS";
/// Environment variable naming the virtual-device launcher.
pub const AVD_CMD_VAR: &str = "PLATFORM_AVD_CMD";
/// Environment variable overriding the bazel launcher used in bazel mode.
pub const BAZEL_CMD_VAR: &str = "PLATFORM_BAZEL_CMD";

/// The resolved platform tree environment.
///
/// Constructed once per invocation by [`TreeEnv::discover`]; immutable
/// thereafter.
#[derive(Clone, Debug)]
pub struct TreeEnv {
    build_top: Utf8PathBuf,
    out_dir: Utf8PathBuf,
    host_out: Utf8PathBuf,
    product_out: Utf8PathBuf,
    serial: Option<String>,
    build_cmd: Utf8PathBuf,
    harness_cmd: Utf8PathBuf,
    avd_cmd: Option<Utf8PathBuf>,
    bazel_cmd: Utf8PathBuf,
    current_dir: Utf8PathBuf,
}

impl TreeEnv {
    /// Discovers the environment from process environment variables and the
    /// current directory.
    pub fn discover() -> Result<Self, TreeEnvError> {
        let current_dir = std::env::current_dir()
            .map_err(TreeEnvError::CurrentDir)
            .and_then(|dir| {
                Utf8PathBuf::from_path_buf(dir)
                    .map_err(|_| TreeEnvError::InvalidPath { name: "PWD" })
            })?;
        Self::from_lookup(&|name| std::env::var(name).ok(), current_dir)
    }

    /// Builds the environment from an arbitrary variable lookup. The
    /// invocation directory must be inside the tree root.
    pub fn from_lookup(
        lookup: &dyn Fn(&'static str) -> Option<String>,
        current_dir: Utf8PathBuf,
    ) -> Result<Self, TreeEnvError> {
        let build_top = Utf8PathBuf::from(
            lookup(BUILD_TOP_VAR).ok_or(TreeEnvError::MissingVar {
                name: BUILD_TOP_VAR,
            })?,
        );

        if !current_dir.starts_with(&build_top) {
            return Err(TreeEnvError::OutsideTree {
                build_top,
                current_dir,
            });
        }

        let out_dir = lookup(OUT_DIR_VAR)
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| build_top.join("out"));
        let host_out = lookup(HOST_OUT_VAR)
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| out_dir.join("host"));
        let product_out = lookup(PRODUCT_OUT_VAR)
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| out_dir.join("target/product"));
        let build_cmd = lookup(BUILD_CMD_VAR)
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| build_top.join("build/tools/platform-build"));
        let harness_cmd = lookup(HARNESS_VAR)
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| host_out.join("bin/test-harness"));
        let bazel_cmd = lookup(BAZEL_CMD_VAR)
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| build_top.join("tools/bazel"));

        Ok(Self {
            build_top,
            out_dir,
            host_out,
            product_out,
            serial: lookup(SERIAL_VAR),
            build_cmd,
            harness_cmd,
            avd_cmd: lookup(AVD_CMD_VAR).map(Utf8PathBuf::from),
            bazel_cmd,
            current_dir,
        })
    }

    /// The source tree root.
    pub fn build_top(&self) -> &Utf8Path {
        &self.build_top
    }

    /// The build output directory.
    pub fn out_dir(&self) -> &Utf8Path {
        &self.out_dir
    }

    /// The host artifact directory.
    pub fn host_out(&self) -> &Utf8Path {
        &self.host_out
    }

    /// The device artifact directory.
    pub fn product_out(&self) -> &Utf8Path {
        &self.product_out
    }

    /// The serial-selection variable, if set.
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// The opaque build command.
    pub fn build_cmd(&self) -> &Utf8Path {
        &self.build_cmd
    }

    /// The harness launcher.
    pub fn harness_cmd(&self) -> &Utf8Path {
        &self.harness_cmd
    }

    /// The virtual-device launcher, if configured.
    pub fn avd_cmd(&self) -> Option<&Utf8Path> {
        self.avd_cmd.as_deref()
    }

    /// The bazel launcher used for bazel-mode test execution.
    pub fn bazel_cmd(&self) -> &Utf8Path {
        &self.bazel_cmd
    }

    /// The invocation directory (inside the tree).
    pub fn current_dir(&self) -> &Utf8Path {
        &self.current_dir
    }

    /// treetest's own state directory under the build output.
    pub fn treetest_dir(&self) -> Utf8PathBuf {
        self.out_dir.join("treetest")
    }

    /// The module-info JSON produced by the build.
    pub fn module_info_json(&self) -> Utf8PathBuf {
        self.product_out.join("module-info.json")
    }

    /// The root under which per-invocation results directories are created.
    pub fn results_root(&self) -> Utf8PathBuf {
        self.treetest_dir().join("results")
    }

    /// Makes `path` relative to the tree root, if it is inside it.
    pub fn rel_to_top<'a>(&self, path: &'a Utf8Path) -> Option<&'a Utf8Path> {
        path.strip_prefix(&self.build_top).ok()
    }
}
