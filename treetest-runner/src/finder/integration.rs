// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{FinderContext, TestFinder};
use crate::{
    descriptor::{FinderKind, RunnerKind, TestDescriptor},
    errors::FinderError,
};
use camino::Utf8PathBuf;
use walkdir::WalkDir;

/// Repo-relative roots searched for harness-internal integration configs.
pub const INTEGRATION_CONFIG_ROOTS: &[&str] = &["tools/harness/res/config", "test/suites/config"];

/// Resolves references that name a harness-internal integration config.
///
/// Descriptors produced here suppress the harness's config-jar-skip flag so
/// the harness scans its own configs for the named integration.
#[derive(Debug)]
pub struct IntegrationFinder;

impl TestFinder for IntegrationFinder {
    fn name(&self) -> &'static str {
        "integration"
    }

    fn find(
        &self,
        ctx: &FinderContext<'_>,
        reference: &str,
    ) -> Result<Vec<TestDescriptor>, FinderError> {
        for root in INTEGRATION_CONFIG_ROOTS {
            let root = ctx.env.build_top().join(root);
            if !root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&root) {
                let entry = entry.map_err(|err| FinderError::Io {
                    path: root.clone(),
                    err: err.into(),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = Utf8PathBuf::from(entry.path().to_string_lossy().into_owned());
                if path.extension() == Some("xml") && path.file_stem() == Some(reference) {
                    return Ok(vec![TestDescriptor::new(
                        reference,
                        RunnerKind::Harness,
                        FinderKind::Integration,
                    )]);
                }
            }
        }

        Err(FinderError::NotMine)
    }
}
