// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The command cache behind `--verify-cmd-mapping` / `--update-cmd-mapping`.
//!
//! Records the last resolved harness command for a given reference set.
//! Verification is exact textual equality of the rendered command: the
//! resolver and argument builder are deterministic, so any drift reflects a
//! real change in the resolved command.

use crate::{errors::CmdCacheError, helpers::flatten_atomic, tree_env::TreeEnv};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::Utf8PathBuf;
use std::{collections::BTreeMap, io::Write};

const CACHE_FILE_NAME: &str = "command-cache.json";

/// The outcome of a verification against the cache.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerifyOutcome {
    /// The cached command matches.
    Match,
    /// No entry exists for this reference set.
    Missing,
    /// The cached command differs.
    Mismatch {
        /// The previously recorded command.
        expected: String,
    },
}

/// The on-disk command cache.
#[derive(Clone, Debug)]
pub struct CmdCache {
    path: Utf8PathBuf,
    entries: BTreeMap<String, String>,
}

impl CmdCache {
    /// Loads the cache; a missing file is an empty cache.
    pub fn load(env: &TreeEnv) -> Result<Self, CmdCacheError> {
        let path = env.treetest_dir().join(CACHE_FILE_NAME);
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|err| CmdCacheError::Parse {
                path: path.clone(),
                err,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(CmdCacheError::Read {
                    path: path.clone(),
                    err,
                });
            }
        };
        Ok(Self { path, entries })
    }

    /// The cache key for a reference set: sorted and joined, so the key is
    /// independent of reference order.
    pub fn key_for(references: &[String]) -> String {
        let mut sorted: Vec<&str> = references.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();
        sorted.join(" ")
    }

    /// Compares `command` against the cached entry for `references`.
    pub fn verify(&self, references: &[String], command: &str) -> VerifyOutcome {
        match self.entries.get(&Self::key_for(references)) {
            None => VerifyOutcome::Missing,
            Some(expected) if expected == command => VerifyOutcome::Match,
            Some(expected) => VerifyOutcome::Mismatch {
                expected: expected.clone(),
            },
        }
    }

    /// Records `command` for `references` and writes the cache through.
    pub fn update(&mut self, references: &[String], command: &str) -> Result<(), CmdCacheError> {
        self.entries
            .insert(Self::key_for(references), command.to_owned());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| CmdCacheError::Write {
                path: self.path.clone(),
                err,
            })?;
        }
        let json =
            serde_json::to_string_pretty(&self.entries).expect("cache entries are serializable");
        AtomicFile::new(&self.path, AllowOverwrite)
            .write(|file| file.write_all(json.as_bytes()))
            .map_err(|err| CmdCacheError::Write {
                path: self.path.clone(),
                err: flatten_atomic(err),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_env::BUILD_TOP_VAR;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;

    fn tree_env(top: &camino::Utf8Path) -> TreeEnv {
        let top_string = top.to_string();
        let lookup = move |name: &'static str| {
            (name == BUILD_TOP_VAR).then(|| top_string.clone())
        };
        TreeEnv::from_lookup(&lookup, top.to_path_buf()).unwrap()
    }

    fn refs(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn update_then_verify_succeeds() {
        let dir = tempdir().unwrap();
        let env = tree_env(dir.path());
        let mut cache = CmdCache::load(&env).unwrap();
        cache
            .update(&refs(&["a_test"]), "test-harness run --include-filter a_test")
            .unwrap();

        // Reload from disk to prove persistence.
        let cache = CmdCache::load(&env).unwrap();
        assert_eq!(
            cache.verify(&refs(&["a_test"]), "test-harness run --include-filter a_test"),
            VerifyOutcome::Match
        );
    }

    #[test]
    fn mismatch_reports_expected_command() {
        let dir = tempdir().unwrap();
        let env = tree_env(dir.path());
        let mut cache = CmdCache::load(&env).unwrap();
        cache.update(&refs(&["a_test"]), "old command").unwrap();
        assert_eq!(
            cache.verify(&refs(&["a_test"]), "new command"),
            VerifyOutcome::Mismatch {
                expected: "old command".to_owned()
            }
        );
    }

    #[test]
    fn key_is_order_independent() {
        assert_eq!(
            CmdCache::key_for(&refs(&["b", "a"])),
            CmdCache::key_for(&refs(&["a", "b", "a"]))
        );
    }

    #[test]
    fn missing_entry_is_distinct_from_mismatch() {
        let dir = tempdir().unwrap();
        let env = tree_env(dir.path());
        let cache = CmdCache::load(&env).unwrap();
        assert_eq!(
            cache.verify(&refs(&["unseen"]), "anything"),
            VerifyOutcome::Missing
        );
    }
}
