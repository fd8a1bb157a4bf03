// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test resolver.
//!
//! Drives the finders in priority order over each user reference, merges
//! descriptors that share a module, and validates the result against the
//! options bundle before anything is built.

use crate::{
    descriptor::{RunnerKind, TestDescriptor},
    errors::ResolveError,
    finder::{all_finders, FinderContext, TestFinder},
    mapping::TestMappings,
    module_index::ModuleIndex,
    options::RunOptions,
    tree_env::TreeEnv,
};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use tracing::debug;

/// The output of resolution: merged descriptors, the union of their build
/// targets, and the (possibly host-adjusted) options.
#[derive(Clone, Debug)]
pub struct ResolvedTests {
    /// Merged descriptors, sorted by module name.
    pub descriptors: Vec<TestDescriptor>,
    /// The union of all build targets.
    pub build_targets: BTreeSet<String>,
    /// The options, with `host` set implicitly when every test is host-only.
    pub options: RunOptions,
}

/// Resolves user references into descriptors.
#[derive(Debug)]
pub struct Resolver<'a> {
    env: &'a TreeEnv,
    index: &'a ModuleIndex,
    mappings: &'a TestMappings,
    finders: Vec<Box<dyn TestFinder>>,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver with the standard finder list.
    pub fn new(env: &'a TreeEnv, index: &'a ModuleIndex, mappings: &'a TestMappings) -> Self {
        Self {
            env,
            index,
            mappings,
            finders: all_finders(),
        }
    }

    /// Resolves the references. Idempotent with respect to duplicates and
    /// order-independent up to descriptor merging.
    pub fn resolve(
        &self,
        references: &[String],
        options: &RunOptions,
    ) -> Result<ResolvedTests, ResolveError> {
        if references.is_empty() {
            return Err(ResolveError::NoReferences);
        }

        let ctx = FinderContext {
            env: self.env,
            index: self.index,
            mappings: self.mappings,
            options,
        };

        let mut merged: IndexMap<String, TestDescriptor> = IndexMap::new();
        for reference in references {
            let found = self.find_one(&ctx, reference)?;
            if found.is_empty() {
                return Err(ResolveError::TestNotFound {
                    reference: reference.clone(),
                });
            }
            for descriptor in found {
                match merged.get_mut(&descriptor.module) {
                    Some(existing) => existing.merge(descriptor)?,
                    None => {
                        merged.insert(descriptor.module.clone(), descriptor);
                    }
                }
            }
        }

        let mut descriptors: Vec<TestDescriptor> = merged.into_values().collect();
        descriptors.sort_by(|a, b| a.module.cmp(&b.module));

        let options = self.validate(&descriptors, options)?;

        if options.host {
            for descriptor in &mut descriptors {
                if descriptor.runner == RunnerKind::Harness {
                    descriptor.runner = RunnerKind::Deviceless;
                }
            }
        }

        let build_targets = descriptors
            .iter()
            .flat_map(|d| d.build_targets.iter().cloned())
            .collect();

        Ok(ResolvedTests {
            descriptors,
            build_targets,
            options,
        })
    }

    fn find_one(
        &self,
        ctx: &FinderContext<'_>,
        reference: &str,
    ) -> Result<Vec<TestDescriptor>, ResolveError> {
        for finder in &self.finders {
            match finder.find(ctx, reference) {
                Ok(descriptors) if !descriptors.is_empty() => {
                    debug!(
                        "reference `{reference}` resolved by the {} finder to {} descriptor(s)",
                        finder.name(),
                        descriptors.len()
                    );
                    return Ok(descriptors);
                }
                Ok(_) => continue,
                Err(err) if err.is_not_mine() => continue,
                Err(err) => {
                    return Err(ResolveError::Finder {
                        reference: reference.to_owned(),
                        err,
                    });
                }
            }
        }
        Ok(Vec::new())
    }

    fn validate(
        &self,
        descriptors: &[TestDescriptor],
        options: &RunOptions,
    ) -> Result<RunOptions, ResolveError> {
        if descriptors.iter().any(|d| d.from_mapping) {
            if let Some(option) = options.mapping_illegal_options().first().copied() {
                return Err(ResolveError::MappingIllegalOption { option });
            }
        }

        let host_only: Vec<String> = descriptors
            .iter()
            .filter(|d| self.is_host_only(d))
            .map(|d| d.module.clone())
            .collect();
        let device_only: Vec<String> = descriptors
            .iter()
            .filter(|d| self.is_device_only(d))
            .map(|d| d.module.clone())
            .collect();

        if options.host && !device_only.is_empty() {
            return Err(ResolveError::DeviceOnlyWithHost {
                modules: device_only,
            });
        }
        if !options.host && !host_only.is_empty() && !device_only.is_empty() {
            return Err(ResolveError::ModeConflict {
                host_only,
                device_only,
            });
        }

        let options = if !options.host && host_only.len() == descriptors.len() {
            debug!("every resolved test is host-only, implying --host");
            options.with_host()
        } else {
            options.clone()
        };

        if !options.host {
            let device_available = !options.serials.is_empty()
                || self.env.serial().is_some()
                || options.start_avd;
            if !device_available {
                let needy: Vec<String> = descriptors
                    .iter()
                    .filter(|d| !self.is_host_only(d) && d.runner != RunnerKind::Bazel)
                    .map(|d| d.module.clone())
                    .collect();
                if !needy.is_empty() {
                    return Err(ResolveError::DeviceMissing { modules: needy });
                }
            }
        }

        Ok(options)
    }

    fn is_host_only(&self, descriptor: &TestDescriptor) -> bool {
        descriptor.host_only
            || self
                .index
                .get(&descriptor.module)
                .is_some_and(|info| info.is_host_only())
    }

    fn is_device_only(&self, descriptor: &TestDescriptor) -> bool {
        !descriptor.host_only
            && self
                .index
                .get(&descriptor.module)
                .is_some_and(|info| info.is_device_only())
    }
}
