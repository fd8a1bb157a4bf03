// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{runner_for, FinderContext, TestFinder};
use crate::{
    descriptor::{FinderKind, TestDescriptor},
    errors::FinderError,
};
use tracing::warn;

/// Resolves references that name a `TEST_MAPPING` group (e.g. `presubmit`).
#[derive(Debug)]
pub struct MappingFinder;

impl TestFinder for MappingFinder {
    fn name(&self) -> &'static str {
        "mapping"
    }

    fn find(
        &self,
        ctx: &FinderContext<'_>,
        reference: &str,
    ) -> Result<Vec<TestDescriptor>, FinderError> {
        let Some(entries) = ctx.mappings.group(reference) else {
            return Err(FinderError::NotMine);
        };

        let mut descriptors = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(info) = ctx.index.get(&entry.name) else {
                warn!(
                    "TEST_MAPPING group `{reference}` names unknown module `{}`, skipping",
                    entry.name
                );
                continue;
            };

            let mut descriptor =
                TestDescriptor::new(&entry.name, runner_for(info, ctx.options), FinderKind::Mapping)
                    .from_mapping(entry.host);
            for (key, value) in entry.option_pairs() {
                descriptor = descriptor.with_module_arg(key, value);
            }
            descriptors.push(descriptor);
        }

        Ok(descriptors)
    }
}
