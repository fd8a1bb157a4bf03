// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{runner_for, FinderContext, TestFinder};
use crate::{
    descriptor::{FinderKind, RunnerKind, TestDescriptor, TestFilter},
    errors::FinderError,
};
use camino::Utf8PathBuf;
use regex::Regex;
use std::sync::OnceLock;

/// Resolves references that are file or directory paths.
///
/// A directory expands to every testable module rooted under it; a config
/// file is treated as an integration; a source file applies class logic to
/// each class it defines; any other file maps to its owning module.
#[derive(Debug)]
pub struct PathFinder;

fn class_decl_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\b(?:class|interface|object)\s+([A-Z][A-Za-z0-9_]*)")
            .expect("static regex is valid")
    })
}

impl TestFinder for PathFinder {
    fn name(&self) -> &'static str {
        "path"
    }

    fn find(
        &self,
        ctx: &FinderContext<'_>,
        reference: &str,
    ) -> Result<Vec<TestDescriptor>, FinderError> {
        let candidate = Utf8PathBuf::from(reference);
        let absolute = if candidate.is_absolute() {
            candidate
        } else {
            ctx.env.current_dir().join(candidate)
        };

        let metadata = match std::fs::metadata(&absolute) {
            Ok(metadata) => metadata,
            Err(_) => return Err(FinderError::NotMine),
        };
        let Some(rel) = ctx.env.rel_to_top(&absolute) else {
            return Err(FinderError::NotMine);
        };

        if metadata.is_dir() {
            let mut descriptors: Vec<TestDescriptor> = ctx
                .index
                .testable_modules_under(rel)
                .into_iter()
                .map(|info| {
                    TestDescriptor::new(&info.name, runner_for(info, ctx.options), FinderKind::Path)
                })
                .collect();
            descriptors.sort_by(|a, b| a.module.cmp(&b.module));
            return Ok(descriptors);
        }

        match absolute.extension() {
            Some("xml") => {
                let stem = absolute.file_stem().expect("file has a stem");
                Ok(vec![TestDescriptor::new(
                    stem,
                    RunnerKind::Harness,
                    FinderKind::Integration,
                )])
            }
            Some("java") | Some("kt") => {
                let Some(info) = ctx.index.find_module_for_path(rel) else {
                    return Ok(Vec::new());
                };
                let contents = std::fs::read_to_string(&absolute).map_err(|err| {
                    FinderError::Io {
                        path: absolute.clone(),
                        err,
                    }
                })?;
                let mut descriptor =
                    TestDescriptor::new(&info.name, runner_for(info, ctx.options), FinderKind::Path);
                for capture in class_decl_regex().captures_iter(&contents) {
                    descriptor = descriptor.with_filter(TestFilter::whole_class(&capture[1]));
                }
                Ok(vec![descriptor])
            }
            _ => match ctx.index.find_module_for_path(rel) {
                Some(info) => Ok(vec![TestDescriptor::new(
                    &info.name,
                    runner_for(info, ctx.options),
                    FinderKind::Path,
                )]),
                None => Ok(Vec::new()),
            },
        }
    }
}
