// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Finders: strategies that turn one user reference into descriptors.
//!
//! Each finder handles one reference style and is tried in a fixed priority
//! order until one returns a non-empty list. The list is constructed
//! explicitly at startup by [`all_finders`]; there is no registration
//! machinery. A finder signals "not my namespace" with
//! [`FinderError::NotMine`], which the resolver treats as fall-through;
//! every other error is terminal.

mod class;
mod integration;
mod mapping;
mod module;
mod path;
mod suite_plan;

pub use class::ClassFinder;
pub use integration::IntegrationFinder;
pub use mapping::MappingFinder;
pub use module::ModuleFinder;
pub use path::PathFinder;
pub use suite_plan::SuitePlanFinder;

use crate::{
    descriptor::{RunnerKind, TestDescriptor},
    errors::FinderError,
    mapping::TestMappings,
    module_index::{ModuleIndex, ModuleInfo, Variant},
    options::RunOptions,
    tree_env::TreeEnv,
};
use std::fmt;

/// Shared state finders consult while resolving a reference.
#[derive(Clone, Copy, Debug)]
pub struct FinderContext<'a> {
    /// The tree environment.
    pub env: &'a TreeEnv,
    /// The module-info index.
    pub index: &'a ModuleIndex,
    /// Discovered TEST_MAPPING files.
    pub mappings: &'a TestMappings,
    /// The invocation options.
    pub options: &'a RunOptions,
}

/// A strategy that turns one user reference into descriptors.
pub trait TestFinder: fmt::Debug {
    /// A short name for logs and errors.
    fn name(&self) -> &'static str;

    /// Resolves one reference. Returns descriptors, an empty list, or an
    /// error; [`FinderError::NotMine`] falls through to the next finder.
    fn find(
        &self,
        ctx: &FinderContext<'_>,
        reference: &str,
    ) -> Result<Vec<TestDescriptor>, FinderError>;
}

/// The full finder list in priority order (high to low).
pub fn all_finders() -> Vec<Box<dyn TestFinder>> {
    vec![
        Box::new(MappingFinder),
        Box::new(ModuleFinder),
        Box::new(IntegrationFinder),
        Box::new(ClassFinder),
        Box::new(PathFinder),
        Box::new(SuitePlanFinder),
    ]
}

/// Picks the execution strategy for a module. `--host` retargeting happens
/// later, in the resolver, once mode validation has passed.
pub(crate) fn runner_for(info: &ModuleInfo, options: &RunOptions) -> RunnerKind {
    if options.bazel_mode && info.is_unit_test && info.has_variant(Variant::Host) {
        RunnerKind::Bazel
    } else if info.is_host_only() {
        RunnerKind::Deviceless
    } else {
        RunnerKind::Harness
    }
}
