// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The module-info index.
//!
//! A derived, cached mapping from module name to build/install metadata.
//! The index is built from the `module-info.json` the platform build
//! generates, persisted to a derived cache under the output directory, and
//! invalidated by a checksum over the set of build-definition files in the
//! tree. Rebuilding goes through the build driver with the single
//! `module-info` target; failure there is fatal, the resolver has no
//! fallback.

use crate::{
    build::{BuildDriver, MODULE_INFO_TARGET},
    errors::ModuleIndexError,
    helpers::flatten_atomic,
    tree_env::TreeEnv,
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, io::Write, time::UNIX_EPOCH};
use tracing::{debug, info};
use walkdir::WalkDir;
use xxhash_rust::xxh64::Xxh64;

/// File names treated as build-definition files for staleness checking.
const BUILD_FILE_NAMES: &[&str] = &["BUILD", "BUILD.bazel"];

const CACHE_FILE_NAME: &str = "module-index.json";
const CHECKSUM_FILE_NAME: &str = "module-info.sum";

/// A supported execution variant for a module.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Variant {
    /// Runs against a device.
    Device,
    /// Runs on the host.
    Host,
}

/// Per-module metadata from the index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleInfo {
    /// The module name.
    pub name: String,
    /// Repo-relative source directories owning the module.
    pub path: Vec<Utf8PathBuf>,
    /// Paths the module installs to.
    pub installed_paths: Vec<Utf8PathBuf>,
    /// Compatibility suites the module belongs to.
    pub compatibility_suites: Vec<String>,
    /// Class tags such as `SHARED_LIBRARIES`, `RLIB`, `DYLIB`.
    pub classes: Vec<String>,
    /// True if the build auto-generates a test config for the module.
    pub auto_test_config: bool,
    /// Explicit test configs, if any.
    pub test_config: Vec<Utf8PathBuf>,
    /// Shared library dependencies.
    pub shared_libs: Vec<String>,
    /// Runtime dependencies.
    pub runtime_deps: Vec<String>,
    /// Data files.
    pub data: Vec<String>,
    /// Data dependencies.
    pub data_deps: Vec<String>,
    /// True for unit tests.
    pub is_unit_test: bool,
    /// The variants this module can run as.
    pub supported_variants: Vec<Variant>,
}

impl ModuleInfo {
    /// True if the module carries (or auto-generates) a test config.
    pub fn is_testable(&self) -> bool {
        self.auto_test_config || !self.test_config.is_empty()
    }

    /// True if the module supports the given variant.
    pub fn has_variant(&self, variant: Variant) -> bool {
        self.supported_variants.contains(&variant)
    }

    /// True if the module runs only on the host.
    pub fn is_host_only(&self) -> bool {
        self.has_variant(Variant::Host) && !self.has_variant(Variant::Device)
    }

    /// True if the module runs only against a device.
    pub fn is_device_only(&self) -> bool {
        self.has_variant(Variant::Device) && !self.has_variant(Variant::Host)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexCache {
    checksum: String,
    modules: IndexMap<String, ModuleInfo>,
}

/// O(1) lookups from module name to [`ModuleInfo`].
#[derive(Clone, Debug)]
pub struct ModuleIndex {
    modules: IndexMap<String, ModuleInfo>,
    checksum: String,
}

impl ModuleIndex {
    /// Loads the index, rebuilding if the cache is stale or missing.
    ///
    /// On `force_rebuild` the build system is invoked unconditionally.
    pub fn load(
        env: &TreeEnv,
        build: &BuildDriver<'_>,
        force_rebuild: bool,
    ) -> Result<Self, ModuleIndexError> {
        let checksum = compute_checksum(env)?;

        if !force_rebuild {
            if let Some(index) = Self::load_cached(env, &checksum) {
                debug!("module index cache is fresh ({} modules)", index.len());
                return Ok(index);
            }
        }

        info!("module index is stale, regenerating through the build");
        build.build(
            &[MODULE_INFO_TARGET.to_owned()].into_iter().collect(),
            &BTreeMap::new(),
            false,
        )?;

        let index = Self::parse_file(&env.module_info_json(), checksum)?;
        index.persist(env)?;
        Ok(index)
    }

    /// Constructs an index directly from modules. Primarily for tests and
    /// for tools that already hold the metadata.
    pub fn from_modules(modules: impl IntoIterator<Item = ModuleInfo>) -> Self {
        Self {
            modules: modules
                .into_iter()
                .map(|info| (info.name.clone(), info))
                .collect(),
            checksum: String::new(),
        }
    }

    fn load_cached(env: &TreeEnv, checksum: &str) -> Option<Self> {
        let saved = std::fs::read_to_string(checksum_path(env)).ok()?;
        if saved.trim() != checksum {
            return None;
        }
        let cache = std::fs::read_to_string(cache_path(env)).ok()?;
        let cache: IndexCache = serde_json::from_str(&cache).ok()?;
        if cache.checksum != checksum {
            return None;
        }
        Some(Self {
            modules: cache.modules,
            checksum: cache.checksum,
        })
    }

    fn parse_file(path: &Utf8Path, checksum: String) -> Result<Self, ModuleIndexError> {
        let contents = std::fs::read_to_string(path).map_err(|err| ModuleIndexError::Read {
            path: path.to_owned(),
            err,
        })?;
        let raw: IndexMap<String, ModuleInfo> =
            serde_json::from_str(&contents).map_err(|err| ModuleIndexError::Parse {
                path: path.to_owned(),
                err,
            })?;

        // Some generators leave the name field empty inside each entry; the
        // map key is authoritative.
        let modules = raw
            .into_iter()
            .map(|(key, mut info)| {
                if info.name.is_empty() {
                    info.name = key.clone();
                }
                (key, info)
            })
            .collect();

        Ok(Self { modules, checksum })
    }

    fn persist(&self, env: &TreeEnv) -> Result<(), ModuleIndexError> {
        let dir = env.treetest_dir();
        std::fs::create_dir_all(&dir).map_err(|err| ModuleIndexError::Persist {
            path: dir.clone(),
            err,
        })?;

        let cache = IndexCache {
            checksum: self.checksum.clone(),
            modules: self.modules.clone(),
        };
        let cache_path = cache_path(env);
        let json = serde_json::to_string(&cache).expect("index cache is serializable");
        AtomicFile::new(&cache_path, AllowOverwrite)
            .write(|file| file.write_all(json.as_bytes()))
            .map_err(|err| ModuleIndexError::Persist {
                path: cache_path,
                err: flatten_atomic(err),
            })?;

        let checksum_path = checksum_path(env);
        AtomicFile::new(&checksum_path, AllowOverwrite)
            .write(|file| file.write_all(self.checksum.as_bytes()))
            .map_err(|err| ModuleIndexError::Persist {
                path: checksum_path,
                err: flatten_atomic(err),
            })?;

        Ok(())
    }

    /// Looks up a module by name.
    pub fn get(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.get(name)
    }

    /// True if `name` is a known module.
    pub fn is_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// True if `name` is a module with a test config.
    pub fn is_testable_module(&self, name: &str) -> bool {
        self.get(name).is_some_and(ModuleInfo::is_testable)
    }

    /// True if `name` is a unit test that runs on the host.
    pub fn is_host_unit_test(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|info| info.is_unit_test && info.has_variant(Variant::Host))
    }

    /// True if `name` is a testable module that drives a device.
    pub fn is_device_driven_test(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|info| info.is_testable() && info.has_variant(Variant::Device))
    }

    /// True if `name` supports the given variant.
    pub fn has_variant(&self, name: &str, variant: Variant) -> bool {
        self.get(name).is_some_and(|info| info.has_variant(variant))
    }

    /// Testable modules belonging to the given compatibility suite, in index
    /// order.
    pub fn testable_modules_in_suite(&self, suite: &str) -> Vec<&str> {
        self.modules
            .values()
            .filter(|info| {
                info.is_testable() && info.compatibility_suites.iter().any(|s| s == suite)
            })
            .map(|info| info.name.as_str())
            .collect()
    }

    /// Finds the module owning the given repo-relative path, preferring the
    /// longest matching module path.
    pub fn find_module_for_path(&self, rel_path: &Utf8Path) -> Option<&ModuleInfo> {
        let mut best: Option<(&ModuleInfo, usize)> = None;
        for info in self.modules.values() {
            for module_path in &info.path {
                if rel_path.starts_with(module_path) {
                    let len = module_path.as_str().len();
                    if best.is_none_or(|(_, best_len)| len > best_len) {
                        best = Some((info, len));
                    }
                }
            }
        }
        best.map(|(info, _)| info)
    }

    /// Testable modules rooted under the given repo-relative directory.
    pub fn testable_modules_under(&self, rel_dir: &Utf8Path) -> Vec<&ModuleInfo> {
        self.modules
            .values()
            .filter(|info| {
                info.is_testable() && info.path.iter().any(|p| p.starts_with(rel_dir))
            })
            .collect()
    }

    /// Iterates over all modules in index order.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.values()
    }

    /// The number of modules in the index.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// True if the index has no modules.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// The checksum this index was built against.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

fn cache_path(env: &TreeEnv) -> Utf8PathBuf {
    env.treetest_dir().join(CACHE_FILE_NAME)
}

fn checksum_path(env: &TreeEnv) -> Utf8PathBuf {
    env.treetest_dir().join(CHECKSUM_FILE_NAME)
}

/// Computes a checksum over the set of build-definition files in the tree.
///
/// The digest covers each file's repo-relative path, length and mtime: enough
/// to catch added, removed and edited build files without hashing contents.
pub fn compute_checksum(env: &TreeEnv) -> Result<String, ModuleIndexError> {
    let mut entries: Vec<(String, u64, u64)> = Vec::new();

    let walker = WalkDir::new(env.build_top())
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') {
                return false;
            }
            // The output directory is derived state; build files never live
            // there.
            entry.path() != env.out_dir().as_std_path() || entry.depth() == 0
        });

    for entry in walker {
        let entry = entry.map_err(ModuleIndexError::Scan)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !BUILD_FILE_NAMES.contains(&name.as_ref()) {
            continue;
        }
        let metadata = entry.metadata().map_err(ModuleIndexError::Scan)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        entries.push((
            entry.path().to_string_lossy().into_owned(),
            metadata.len(),
            mtime,
        ));
    }

    entries.sort();

    let mut hasher = Xxh64::new(0);
    for (path, len, mtime) in &entries {
        hasher.update(path.as_bytes());
        hasher.update(&len.to_le_bytes());
        hasher.update(&mtime.to_le_bytes());
    }
    Ok(format!("{:016x}", hasher.digest()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_env::BUILD_TOP_VAR;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;

    fn tree_env(top: &Utf8Path) -> TreeEnv {
        let top_string = top.to_string();
        let lookup = move |name: &'static str| {
            (name == BUILD_TOP_VAR).then(|| top_string.clone())
        };
        TreeEnv::from_lookup(&lookup, top.to_path_buf()).unwrap()
    }

    fn module(name: &str, paths: &[&str]) -> ModuleInfo {
        ModuleInfo {
            name: name.to_owned(),
            path: paths.iter().map(|p| (*p).into()).collect(),
            auto_test_config: true,
            supported_variants: vec![Variant::Device, Variant::Host],
            ..ModuleInfo::default()
        }
    }

    #[test]
    fn checksum_changes_when_build_files_change() {
        let dir = tempdir().unwrap();
        let env = tree_env(dir.path());
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/BUILD"), "module a\n").unwrap();

        let first = compute_checksum(&env).unwrap();
        assert_eq!(first, compute_checksum(&env).unwrap());

        std::fs::write(dir.path().join("pkg/BUILD"), "module a\nmodule b\n").unwrap();
        let second = compute_checksum(&env).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn checksum_ignores_non_build_files() {
        let dir = tempdir().unwrap();
        let env = tree_env(dir.path());
        std::fs::write(dir.path().join("BUILD"), "module a\n").unwrap();

        let first = compute_checksum(&env).unwrap();
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        assert_eq!(first, compute_checksum(&env).unwrap());
    }

    #[test]
    fn cache_roundtrip() {
        let dir = tempdir().unwrap();
        let env = tree_env(dir.path());
        let index = ModuleIndex {
            modules: [("a_test".to_owned(), module("a_test", &["pkg/a"]))]
                .into_iter()
                .collect(),
            checksum: "00000000deadbeef".to_owned(),
        };
        index.persist(&env).unwrap();

        let loaded = ModuleIndex::load_cached(&env, "00000000deadbeef").unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.is_testable_module("a_test"));

        // A different checksum invalidates the cache.
        assert!(ModuleIndex::load_cached(&env, "ffffffff00000000").is_none());
    }

    #[test]
    fn parse_fills_names_from_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("module-info.json");
        std::fs::write(
            &path,
            r#"{"a_test": {"path": ["pkg/a"], "auto_test_config": true}}"#,
        )
        .unwrap();
        let index = ModuleIndex::parse_file(&path, String::new()).unwrap();
        assert_eq!(index.get("a_test").unwrap().name, "a_test");
    }

    #[test]
    fn longest_path_prefix_wins() {
        let index = ModuleIndex::from_modules([
            module("outer", &["pkg"]),
            module("inner", &["pkg/nested"]),
        ]);
        let owner = index
            .find_module_for_path(Utf8Path::new("pkg/nested/src/FooTest.java"))
            .unwrap();
        assert_eq!(owner.name, "inner");

        let owner = index
            .find_module_for_path(Utf8Path::new("pkg/src/BarTest.java"))
            .unwrap();
        assert_eq!(owner.name, "outer");

        assert!(index
            .find_module_for_path(Utf8Path::new("elsewhere/Baz.java"))
            .is_none());
    }

    #[test]
    fn suite_lookup() {
        let mut in_suite = module("in_suite", &["a"]);
        in_suite.compatibility_suites = vec!["general-tests".to_owned()];
        let index = ModuleIndex::from_modules([in_suite, module("other", &["b"])]);
        assert_eq!(index.testable_modules_in_suite("general-tests"), vec!["in_suite"]);
        assert!(index.testable_modules_in_suite("device-tests").is_empty());
    }
}
