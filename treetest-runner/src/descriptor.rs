// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolved test descriptors.
//!
//! A [`TestDescriptor`] is the unit the resolver produces and the harness
//! supervisor consumes: a module plus optional filters, tagged with the
//! finder that produced it. Descriptors are immutable once resolution
//! completes; merging happens only inside the resolver.

use crate::{build::MODULE_INFO_TARGET, errors::ResolveError};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt,
};

/// The execution strategy for a descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerKind {
    /// The external test harness, driving a device or host as needed.
    Harness,
    /// The harness in deviceless (host-only) mode.
    Deviceless,
    /// The bazel test runner, for host unit tests under `--bazel-mode`.
    Bazel,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerKind::Harness => write!(f, "harness"),
            RunnerKind::Deviceless => write!(f, "deviceless"),
            RunnerKind::Bazel => write!(f, "bazel"),
        }
    }
}

/// The finder that produced a descriptor.
///
/// Downstream argument construction depends on this: descriptors produced by
/// the integration finder suppress the harness's config-jar-skip flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinderKind {
    /// A `TEST_MAPPING` group entry.
    Mapping,
    /// An exact module-name match.
    Module,
    /// A harness-internal integration config.
    Integration,
    /// A class or method reference resolved through source scanning.
    ClassOrMethod,
    /// A file or directory path.
    Path,
    /// A suite plan file.
    SuitePlan,
}

impl fmt::Display for FinderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinderKind::Mapping => write!(f, "mapping"),
            FinderKind::Module => write!(f, "module"),
            FinderKind::Integration => write!(f, "integration"),
            FinderKind::ClassOrMethod => write!(f, "class-or-method"),
            FinderKind::Path => write!(f, "path"),
            FinderKind::SuitePlan => write!(f, "suite-plan"),
        }
    }
}

/// A class-level test filter. An empty `methods` set means "run the whole
/// class".
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TestFilter {
    /// The (possibly package-qualified) class name.
    pub class_name: String,
    /// Methods to run; empty means the whole class.
    pub methods: BTreeSet<String>,
}

impl TestFilter {
    /// A whole-class filter.
    pub fn whole_class(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            methods: BTreeSet::new(),
        }
    }

    /// A filter for specific methods of a class.
    pub fn methods(
        class_name: impl Into<String>,
        methods: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            methods: methods.into_iter().map(|m| m.into()).collect(),
        }
    }

    /// Merges two filters on the same class: the union of methods, except
    /// that a whole-class filter absorbs any method list.
    fn merge_same_class(&mut self, other: TestFilter) {
        debug_assert_eq!(self.class_name, other.class_name);
        if self.methods.is_empty() || other.methods.is_empty() {
            self.methods.clear();
        } else {
            self.methods.extend(other.methods);
        }
    }
}

impl fmt::Display for TestFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class_name)?;
        if !self.methods.is_empty() {
            write!(f, "#{}", itertools::join(&self.methods, ","))?;
        }
        Ok(())
    }
}

/// Merges two filter sets with class-level absorption applied.
pub(crate) fn merge_filter_sets(
    left: BTreeSet<TestFilter>,
    right: BTreeSet<TestFilter>,
) -> BTreeSet<TestFilter> {
    let mut by_class: indexmap::IndexMap<String, TestFilter> = indexmap::IndexMap::new();
    for filter in left.into_iter().chain(right) {
        match by_class.get_mut(&filter.class_name) {
            Some(existing) => existing.merge_same_class(filter),
            None => {
                by_class.insert(filter.class_name.clone(), filter);
            }
        }
    }
    by_class.into_values().collect()
}

/// A resolved, executable reference to a module plus optional filters.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestDescriptor {
    /// The build/install unit that owns the test. Never empty.
    pub module: String,
    /// The execution strategy.
    pub runner: RunnerKind,
    /// The finder that produced this descriptor.
    pub finder: FinderKind,
    /// Build targets that must exist before the runner is spawned. Always
    /// contains the module's own name and the module-info target.
    pub build_targets: BTreeSet<String>,
    /// Filters; empty means "run the whole module".
    pub filters: BTreeSet<TestFilter>,
    /// Per-module options passed verbatim to the harness.
    pub module_args: Vec<(String, String)>,
    /// True if this descriptor came from a `TEST_MAPPING` entry.
    pub from_mapping: bool,
    /// Host-only hint from mapping entries.
    pub host_only: bool,
}

impl TestDescriptor {
    /// Creates a whole-module descriptor. The build target set is seeded with
    /// the module's own name and the module-info target.
    pub fn new(module: impl Into<String>, runner: RunnerKind, finder: FinderKind) -> Self {
        let module = module.into();
        let build_targets = [module.clone(), MODULE_INFO_TARGET.to_owned()]
            .into_iter()
            .collect();
        Self {
            module,
            runner,
            finder,
            build_targets,
            filters: BTreeSet::new(),
            module_args: Vec::new(),
            from_mapping: false,
            host_only: false,
        }
    }

    /// Adds a filter.
    pub fn with_filter(mut self, filter: TestFilter) -> Self {
        self.filters.insert(filter);
        self
    }

    /// Adds a build target.
    pub fn with_build_target(mut self, target: impl Into<String>) -> Self {
        self.build_targets.insert(target.into());
        self
    }

    /// Appends a per-module harness option.
    pub fn with_module_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.module_args.push((key.into(), value.into()));
        self
    }

    /// Marks this descriptor as produced from a `TEST_MAPPING` entry.
    pub fn from_mapping(mut self, host_only: bool) -> Self {
        self.from_mapping = true;
        self.host_only = host_only;
        self
    }

    /// Merges `other` (same module) into `self`. Filters merge with
    /// whole-class and whole-module absorption; the runners must agree.
    pub fn merge(&mut self, other: TestDescriptor) -> Result<(), ResolveError> {
        debug_assert_eq!(self.module, other.module);
        if self.runner != other.runner {
            return Err(ResolveError::RunnerMismatch {
                module: self.module.clone(),
                left: self.runner,
                right: other.runner,
            });
        }

        self.build_targets.extend(other.build_targets);

        // An empty filter set means "run the whole module" and absorbs any
        // class-level filters from the other side.
        if self.filters.is_empty() || other.filters.is_empty() {
            self.filters.clear();
        } else {
            self.filters = merge_filter_sets(
                std::mem::take(&mut self.filters),
                other.filters,
            );
        }

        for arg in other.module_args {
            if !self.module_args.contains(&arg) {
                self.module_args.push(arg);
            }
        }

        self.from_mapping |= other.from_mapping;
        self.host_only |= other.host_only;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_descriptor_seeds_build_targets() {
        let descriptor = TestDescriptor::new("hello_world_test", RunnerKind::Harness, FinderKind::Module);
        assert!(descriptor.build_targets.contains("hello_world_test"));
        assert!(descriptor.build_targets.contains(MODULE_INFO_TARGET));
        assert!(descriptor.filters.is_empty());
    }

    #[test]
    fn merge_is_idempotent() {
        let mut descriptor = TestDescriptor::new("m", RunnerKind::Harness, FinderKind::Module)
            .with_filter(TestFilter::methods("FooTest", ["a"]))
            .with_module_arg("opt", "v");
        let copy = descriptor.clone();
        descriptor.merge(copy.clone()).unwrap();
        assert_eq!(descriptor, copy);
    }

    #[test]
    fn merge_unions_methods() {
        let mut left = TestDescriptor::new("m", RunnerKind::Harness, FinderKind::ClassOrMethod)
            .with_filter(TestFilter::methods("FooTest", ["a"]));
        let right = TestDescriptor::new("m", RunnerKind::Harness, FinderKind::ClassOrMethod)
            .with_filter(TestFilter::methods("FooTest", ["b"]));
        left.merge(right).unwrap();
        assert_eq!(
            left.filters.into_iter().collect::<Vec<_>>(),
            vec![TestFilter::methods("FooTest", ["a", "b"])]
        );
    }

    #[test]
    fn whole_class_absorbs_methods() {
        let whole = TestFilter::whole_class("C");
        let methods = TestFilter::methods("C", ["m"]);
        let merged = merge_filter_sets(
            [whole.clone()].into_iter().collect(),
            [methods].into_iter().collect(),
        );
        assert_eq!(merged.into_iter().collect::<Vec<_>>(), vec![whole]);
    }

    #[test]
    fn whole_module_absorbs_filters() {
        let mut whole = TestDescriptor::new("m", RunnerKind::Harness, FinderKind::Module);
        let filtered = TestDescriptor::new("m", RunnerKind::Harness, FinderKind::ClassOrMethod)
            .with_filter(TestFilter::methods("FooTest", ["a"]));
        whole.merge(filtered).unwrap();
        assert!(whole.filters.is_empty());
    }

    #[test]
    fn disagreeing_runners_fail() {
        let mut left = TestDescriptor::new("m", RunnerKind::Harness, FinderKind::Module);
        let right = TestDescriptor::new("m", RunnerKind::Bazel, FinderKind::Module);
        let err = left.merge(right).unwrap_err();
        assert!(matches!(err, ResolveError::RunnerMismatch { .. }));
    }

    #[test]
    fn filter_display() {
        assert_eq!(TestFilter::whole_class("a.b.C").to_string(), "a.b.C");
        assert_eq!(
            TestFilter::methods("C", ["b", "a"]).to_string(),
            "C#a,b",
        );
    }
}
