// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{runner_for, FinderContext, TestFinder};
use crate::{
    descriptor::{FinderKind, TestDescriptor, TestFilter},
    errors::FinderError,
};
use camino::Utf8PathBuf;
use regex::Regex;
use std::collections::BTreeSet;
use walkdir::WalkDir;

const SOURCE_EXTENSIONS: &[&str] = &["java", "kt"];

/// A parsed class-or-method reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ClassReference {
    pub(crate) package: Option<String>,
    pub(crate) class: String,
    pub(crate) methods: BTreeSet<String>,
}

impl ClassReference {
    /// Parses `pkg.Class`, `Class`, `Class#m` or `pkg.Class#m1,m2`. The class
    /// segment must start with an uppercase letter; package segments must
    /// not.
    pub(crate) fn parse(reference: &str) -> Option<Self> {
        let (type_part, method_part) = match reference.split_once('#') {
            Some((t, m)) => (t, Some(m)),
            None => (reference, None),
        };

        let segments: Vec<&str> = type_part.split('.').collect();
        if segments.iter().any(|s| !is_identifier(s)) {
            return None;
        }
        let class = *segments.last()?;
        if !class.starts_with(|c: char| c.is_ascii_uppercase()) {
            return None;
        }
        let package_segments = &segments[..segments.len() - 1];
        if package_segments
            .iter()
            .any(|s| s.starts_with(|c: char| c.is_ascii_uppercase()))
        {
            return None;
        }

        let methods = match method_part {
            Some(m) => {
                let methods: BTreeSet<String> = m
                    .split(',')
                    .filter(|m| !m.is_empty())
                    .map(str::to_owned)
                    .collect();
                if methods.is_empty() || !methods.iter().all(|m| is_identifier(m)) {
                    return None;
                }
                methods
            }
            None => BTreeSet::new(),
        };

        Some(Self {
            package: (!package_segments.is_empty()).then(|| package_segments.join(".")),
            class: class.to_owned(),
            methods,
        })
    }

    fn qualified_name(&self) -> String {
        match &self.package {
            Some(pkg) => format!("{pkg}.{}", self.class),
            None => self.class.clone(),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Resolves `pkg.Class#method`-shaped references by scanning source files
/// under testable module paths for the class declaration.
///
/// A class defined in more than one module is ambiguous and fails the run
/// with the candidate list; the resolver never picks one silently.
#[derive(Debug)]
pub struct ClassFinder;

impl TestFinder for ClassFinder {
    fn name(&self) -> &'static str {
        "class-or-method"
    }

    fn find(
        &self,
        ctx: &FinderContext<'_>,
        reference: &str,
    ) -> Result<Vec<TestDescriptor>, FinderError> {
        let Some(class_ref) = ClassReference::parse(reference) else {
            return Err(FinderError::NotMine);
        };

        let declaration = Regex::new(&format!(
            r"\b(?:class|interface|object)\s+{}\b",
            regex::escape(&class_ref.class)
        ))
        .expect("escaped class name is a valid regex");
        let package_decl = class_ref.package.as_ref().map(|pkg| {
            Regex::new(&format!(r"(?m)^\s*package\s+{}\s*;?", regex::escape(pkg)))
                .expect("escaped package name is a valid regex")
        });

        let mut owners: BTreeSet<String> = BTreeSet::new();
        for info in ctx.index.modules() {
            if !info.is_testable() {
                continue;
            }
            for module_path in &info.path {
                let dir = ctx.env.build_top().join(module_path);
                if !dir.is_dir() {
                    continue;
                }
                for entry in WalkDir::new(&dir) {
                    let entry = entry.map_err(|err| FinderError::Io {
                        path: dir.clone(),
                        err: err.into(),
                    })?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let path = Utf8PathBuf::from(entry.path().to_string_lossy().into_owned());
                    let matches_name = path.file_stem() == Some(class_ref.class.as_str())
                        && path
                            .extension()
                            .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
                    if !matches_name {
                        continue;
                    }
                    let Ok(contents) = std::fs::read_to_string(&path) else {
                        continue;
                    };
                    if !declaration.is_match(&contents) {
                        continue;
                    }
                    if let Some(package_decl) = &package_decl {
                        if !package_decl.is_match(&contents) {
                            continue;
                        }
                    }
                    owners.insert(info.name.clone());
                }
            }
        }

        match owners.len() {
            0 => Err(FinderError::NotMine),
            1 => {
                let module = owners.into_iter().next().expect("one owner");
                let info = ctx.index.get(&module).expect("owner is indexed");
                let filter = TestFilter {
                    class_name: class_ref.qualified_name(),
                    methods: class_ref.methods,
                };
                Ok(vec![TestDescriptor::new(
                    module,
                    runner_for(info, ctx.options),
                    FinderKind::ClassOrMethod,
                )
                .with_filter(filter)])
            }
            _ => Err(FinderError::AmbiguousClass {
                class: reference.to_owned(),
                candidates: owners.into_iter().collect(),
            }),
        }
    }
}
