// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Virtual-device startup, a thin collaborator behind `--start-avd`.

use crate::{errors::AvdError, tree_env::TreeEnv};
use tracing::info;

/// Launches the configured virtual-device command and waits for it to exit.
///
/// The launcher owns all device semantics; treetest only cares whether it
/// succeeded.
pub fn start_avd(env: &TreeEnv) -> Result<(), AvdError> {
    let Some(command) = env.avd_cmd() else {
        return Err(AvdError::NotConfigured);
    };

    info!("starting virtual device via {command}");
    let output = duct::cmd!(command.as_str())
        .unchecked()
        .run()
        .map_err(|err| AvdError::Exec {
            command: command.to_string(),
            err,
        })?;

    if !output.status.success() {
        return Err(AvdError::Failed {
            command: command.to_string(),
            exit_code: output.status.code(),
        });
    }
    Ok(())
}
