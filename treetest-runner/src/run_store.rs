// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage management for treetest runs.
//!
//! Each invocation gets a timestamped results directory holding the harness
//! log and the protobuf result file the harness writes; a `history.jsonl`
//! index at the results root records one line per run.

use crate::{errors::RunStoreError, helpers::flatten_atomic, tree_env::TreeEnv};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

const HARNESS_LOG_FILE_NAME: &str = "harness.log";
const PROTO_RESULT_FILE_NAME: &str = "results.pb";
const HISTORY_FILE_NAME: &str = "history.jsonl";

/// Paths for one invocation's results.
#[derive(Clone, Debug)]
pub struct RunPaths {
    /// The per-invocation directory.
    pub dir: Utf8PathBuf,
    /// Where the harness's stdout is pumped.
    pub harness_log: Utf8PathBuf,
    /// The opaque protobuf result file the harness writes.
    pub proto_result: Utf8PathBuf,
}

/// One line of the history index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// The user references, as given.
    pub references: Vec<String>,
    /// Cases that passed.
    pub passed: usize,
    /// Cases that failed.
    pub failed: usize,
    /// Cases that were ignored.
    pub ignored: usize,
    /// Cases with failed assumptions.
    pub assumption_failed: usize,
    /// Cases or modules that never closed.
    pub incomplete: usize,
    /// The process exit code the run produced.
    pub exit_code: i32,
    /// Wall-clock duration in seconds.
    pub duration_secs: f64,
}

/// Manages the results root for a tree.
#[derive(Clone, Debug)]
pub struct RunStore {
    results_root: Utf8PathBuf,
}

impl RunStore {
    /// Creates the results root if needed.
    pub fn new(env: &TreeEnv) -> Result<Self, RunStoreError> {
        let results_root = env.results_root();
        std::fs::create_dir_all(&results_root).map_err(|err| RunStoreError::Create {
            path: results_root.clone(),
            err,
        })?;
        Ok(Self { results_root })
    }

    /// The results root.
    pub fn results_root(&self) -> &Utf8Path {
        &self.results_root
    }

    /// Creates a fresh timestamped directory for one invocation.
    pub fn create_run(&self, started_at: DateTime<Utc>) -> Result<RunPaths, RunStoreError> {
        let base = started_at.format("%Y%m%d-%H%M%S").to_string();
        // Two invocations can land in the same second; bump a suffix until
        // the create succeeds.
        for attempt in 0u32.. {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };
            let dir = self.results_root.join(name);
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    return Ok(RunPaths {
                        harness_log: dir.join(HARNESS_LOG_FILE_NAME),
                        proto_result: dir.join(PROTO_RESULT_FILE_NAME),
                        dir,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(RunStoreError::Create { path: dir, err }),
            }
        }
        unreachable!("create_dir retry loop is unbounded")
    }

    /// Appends one record to the history index. The file is rewritten under
    /// an atomic rename to prevent torn reads by a concurrent invocation.
    pub fn append_history(&self, record: &RunRecord) -> Result<(), RunStoreError> {
        let path = self.history_path();
        let mut contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(RunStoreError::Write { path, err }),
        };
        let line = serde_json::to_string(record).expect("run record is serializable");
        contents.push_str(&line);
        contents.push('\n');

        AtomicFile::new(&path, AllowOverwrite)
            .write(|file| file.write_all(contents.as_bytes()))
            .map_err(|err| RunStoreError::Write {
                path,
                err: flatten_atomic(err),
            })
    }

    /// The history index path.
    pub fn history_path(&self) -> Utf8PathBuf {
        self.results_root.join(HISTORY_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_env::BUILD_TOP_VAR;
    use camino_tempfile::tempdir;

    fn tree_env(top: &Utf8Path) -> TreeEnv {
        let top_string = top.to_string();
        let lookup = move |name: &'static str| {
            (name == BUILD_TOP_VAR).then(|| top_string.clone())
        };
        TreeEnv::from_lookup(&lookup, top.to_path_buf()).unwrap()
    }

    #[test]
    fn same_second_runs_get_distinct_dirs() {
        let dir = tempdir().unwrap();
        let store = RunStore::new(&tree_env(dir.path())).unwrap();
        let now = Utc::now();
        let first = store.create_run(now).unwrap();
        let second = store.create_run(now).unwrap();
        assert_ne!(first.dir, second.dir);
        assert!(first.harness_log.starts_with(&first.dir));
    }

    #[test]
    fn history_appends_lines() {
        let dir = tempdir().unwrap();
        let store = RunStore::new(&tree_env(dir.path())).unwrap();
        let record = RunRecord {
            started_at: Utc::now(),
            references: vec!["a_test".to_owned()],
            passed: 1,
            failed: 0,
            ignored: 0,
            assumption_failed: 0,
            incomplete: 0,
            exit_code: 0,
            duration_secs: 1.5,
        };
        store.append_history(&record).unwrap();
        store.append_history(&record).unwrap();

        let contents = std::fs::read_to_string(store.history_path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: RunRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.references, vec!["a_test"]);
    }
}
