// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `TEST_MAPPING` discovery and parsing.
//!
//! `TEST_MAPPING` files group tests by named triggers (e.g. `presubmit`) and
//! are distributed through the source tree. Discovery walks from the
//! invocation directory up to the tree root, merging every file found along
//! the way; `imports` entries pull in mappings from other directories.

use crate::{errors::MappingError, tree_env::TreeEnv};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::debug;

/// The well-known mapping file name.
pub const TEST_MAPPING: &str = "TEST_MAPPING";

/// One test entry inside a mapping group.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct MappingEntry {
    /// The module name.
    pub name: String,
    /// True if the test should run on the host.
    #[serde(default)]
    pub host: bool,
    /// Per-module options, each a single-key object in the file.
    #[serde(default)]
    pub options: Vec<IndexMap<String, String>>,
}

impl MappingEntry {
    /// Flattens the single-key option objects into ordered pairs.
    pub fn option_pairs(&self) -> Vec<(String, String)> {
        self.options
            .iter()
            .flat_map(|object| object.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawMapping {
    #[serde(default)]
    imports: Vec<Import>,
    #[serde(flatten)]
    groups: IndexMap<String, Vec<MappingEntry>>,
}

#[derive(Debug, Deserialize)]
struct Import {
    path: Utf8PathBuf,
}

/// The merged view of every mapping file relevant to an invocation.
#[derive(Clone, Debug, Default)]
pub struct TestMappings {
    groups: IndexMap<String, Vec<MappingEntry>>,
}

impl TestMappings {
    /// Discovers mapping files by walking from `start_dir` up to the tree
    /// root, then follows imports (cycle-safe, repo-relative).
    pub fn discover(env: &TreeEnv, start_dir: &Utf8Path) -> Result<Self, MappingError> {
        let mut mappings = Self::default();
        let mut visited = BTreeSet::new();
        let mut pending: Vec<Utf8PathBuf> = Vec::new();

        let mut dir = start_dir;
        loop {
            pending.push(dir.to_owned());
            if dir == env.build_top() {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }

        while let Some(dir) = pending.pop() {
            if !visited.insert(dir.clone()) {
                continue;
            }
            let file = dir.join(TEST_MAPPING);
            if !file.is_file() {
                continue;
            }
            debug!("loading mapping file {file}");
            let raw = load_file(&file)?;
            for import in raw.imports {
                pending.push(env.build_top().join(&import.path));
            }
            for (group, entries) in raw.groups {
                mappings.groups.entry(group).or_default().extend(entries);
            }
        }

        Ok(mappings)
    }

    /// True if the given name is a known mapping group.
    pub fn is_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// The entries of a group, if present.
    pub fn group(&self, name: &str) -> Option<&[MappingEntry]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    /// The known group names, in discovery order.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

fn load_file(path: &Utf8Path) -> Result<RawMapping, MappingError> {
    let contents = std::fs::read_to_string(path).map_err(|err| MappingError::Read {
        path: path.to_owned(),
        err,
    })?;
    let stripped = strip_comments(&contents);
    serde_json::from_str(&stripped).map_err(|err| MappingError::Parse {
        path: path.to_owned(),
        err,
    })
}

// Mapping files allow full-line // comments, which JSON does not.
fn strip_comments(contents: &str) -> String {
    contents
        .lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_env::BUILD_TOP_VAR;
    use camino_tempfile::tempdir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn tree_env(top: &Utf8Path) -> TreeEnv {
        let top_string = top.to_string();
        let lookup = move |name: &'static str| {
            (name == BUILD_TOP_VAR).then(|| top_string.clone())
        };
        TreeEnv::from_lookup(&lookup, top.to_path_buf()).unwrap()
    }

    #[test]
    fn walks_to_tree_root_and_merges() {
        let dir = tempdir().unwrap();
        let env = tree_env(dir.path());
        let nested = dir.path().join("pkg/nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            dir.path().join("TEST_MAPPING"),
            r#"{"presubmit": [{"name": "root_test"}]}"#,
        )
        .unwrap();
        std::fs::write(
            nested.join("TEST_MAPPING"),
            r#"{"presubmit": [{"name": "nested_test", "host": true}]}"#,
        )
        .unwrap();

        let mappings = TestMappings::discover(&env, &nested).unwrap();
        let entries = mappings.group("presubmit").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"root_test"));
        assert!(names.contains(&"nested_test"));
        assert!(entries.iter().find(|e| e.name == "nested_test").unwrap().host);
    }

    #[test]
    fn comments_and_options_parse() {
        let dir = tempdir().unwrap();
        let env = tree_env(dir.path());
        std::fs::write(
            dir.path().join("TEST_MAPPING"),
            indoc! {r#"
                {
                  // tests that gate submission
                  "presubmit": [
                    {
                      "name": "a_test",
                      "options": [
                        {"include-annotation": "android.platform.test.annotations.Presubmit"}
                      ]
                    }
                  ]
                }
            "#},
        )
        .unwrap();

        let mappings = TestMappings::discover(&env, dir.path()).unwrap();
        let entry = &mappings.group("presubmit").unwrap()[0];
        assert_eq!(
            entry.option_pairs(),
            vec![(
                "include-annotation".to_owned(),
                "android.platform.test.annotations.Presubmit".to_owned()
            )]
        );
    }

    #[test]
    fn imports_are_followed_once() {
        let dir = tempdir().unwrap();
        let env = tree_env(dir.path());
        let other = dir.path().join("other");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(
            dir.path().join("TEST_MAPPING"),
            r#"{"imports": [{"path": "other"}], "presubmit": [{"name": "root_test"}]}"#,
        )
        .unwrap();
        // The import cycles back to the root; discovery must terminate.
        std::fs::write(
            other.join("TEST_MAPPING"),
            r#"{"imports": [{"path": ""}], "postsubmit": [{"name": "other_test"}]}"#,
        )
        .unwrap();

        let mappings = TestMappings::discover(&env, dir.path()).unwrap();
        assert!(mappings.is_group("presubmit"));
        assert_eq!(
            mappings.group("postsubmit").unwrap()[0].name,
            "other_test"
        );
    }

    #[test]
    fn unknown_group_is_none() {
        let mappings = TestMappings::default();
        assert!(!mappings.is_group("presubmit"));
        assert!(mappings.group("presubmit").is_none());
    }
}
