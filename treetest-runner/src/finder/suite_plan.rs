// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{runner_for, FinderContext, TestFinder};
use crate::{
    descriptor::{FinderKind, TestDescriptor},
    errors::FinderError,
};
use tracing::warn;

/// Repo-relative directory holding suite plan files.
pub const PLAN_ROOT: &str = "tools/harness/res/plans";

/// Resolves references that name a suite plan file: a line-oriented list of
/// module names under [`PLAN_ROOT`], expanded to its contents.
#[derive(Debug)]
pub struct SuitePlanFinder;

impl TestFinder for SuitePlanFinder {
    fn name(&self) -> &'static str {
        "suite-plan"
    }

    fn find(
        &self,
        ctx: &FinderContext<'_>,
        reference: &str,
    ) -> Result<Vec<TestDescriptor>, FinderError> {
        let plan = ctx
            .env
            .build_top()
            .join(PLAN_ROOT)
            .join(format!("{reference}.plan"));
        if !plan.is_file() {
            return Err(FinderError::NotMine);
        }

        let contents = std::fs::read_to_string(&plan).map_err(|err| FinderError::Io {
            path: plan.clone(),
            err,
        })?;

        let mut descriptors = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(info) = ctx.index.get(line) else {
                warn!("suite plan `{reference}` names unknown module `{line}`, skipping");
                continue;
            };
            descriptors.push(TestDescriptor::new(
                line,
                runner_for(info, ctx.options),
                FinderKind::SuitePlan,
            ));
        }

        Ok(descriptors)
    }
}
