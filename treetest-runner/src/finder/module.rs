// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{runner_for, FinderContext, TestFinder};
use crate::{
    descriptor::{FinderKind, TestDescriptor},
    errors::FinderError,
};

/// Resolves references that exactly match a testable module name. The whole
/// module runs.
#[derive(Debug)]
pub struct ModuleFinder;

impl TestFinder for ModuleFinder {
    fn name(&self) -> &'static str {
        "module"
    }

    fn find(
        &self,
        ctx: &FinderContext<'_>,
        reference: &str,
    ) -> Result<Vec<TestDescriptor>, FinderError> {
        let Some(info) = ctx.index.get(reference) else {
            return Err(FinderError::NotMine);
        };
        if !info.is_testable() {
            // A real module, but nothing to run; let lower-priority finders
            // try the name as a class or path.
            return Err(FinderError::NotMine);
        }

        Ok(vec![TestDescriptor::new(
            reference,
            runner_for(info, ctx.options),
            FinderKind::Module,
        )])
    }
}
