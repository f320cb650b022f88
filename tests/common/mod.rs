//! Shared helpers for integration tests.

#![allow(dead_code)]

use config_manager::model::CONFIG_FILE_NAME;
use config_manager::testutil::CallCounter;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::{NamedTempFile, TempDir};

/// Upper bound for a reload to become visible.
pub const RELOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Replace `path` atomically by writing a sibling temp file and renaming it
/// over the target, the way deployment tools publish config files.
pub fn safe_write_file(path: &Path, data: &[u8]) {
    let dir = path.parent().expect("path has a parent");
    let mut tmp = NamedTempFile::new_in(dir).unwrap();
    tmp.write_all(data).unwrap();
    tmp.as_file().sync_all().unwrap();
    tmp.persist(path).unwrap();
}

/// Serialize `(key, value)` pairs into the on-disk record array.
pub fn configs_json(configs: &[(&str, Value)]) -> Vec<u8> {
    let records: Vec<Value> = configs
        .iter()
        .map(|(k, v)| serde_json::json!({ "key": k, "value": v }))
        .collect();
    serde_json::to_vec(&records).unwrap()
}

/// A temporary config root with one scope directory.
pub struct ScopeDir {
    pub root: TempDir,
    pub scope: String,
}

impl ScopeDir {
    pub fn new(scope: &str) -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join(scope)).unwrap();
        Self {
            root,
            scope: scope.to_string(),
        }
    }

    pub fn file_path(&self) -> PathBuf {
        self.root.path().join(&self.scope).join(CONFIG_FILE_NAME)
    }

    pub fn write(&self, configs: &[(&str, Value)]) {
        safe_write_file(&self.file_path(), &configs_json(configs));
    }

    pub fn write_raw(&self, data: &[u8]) {
        safe_write_file(&self.file_path(), data);
    }
}

/// Block until `cond` holds, re-checking after every watcher callback.
///
/// A single file replacement may produce several callbacks, so tests wait
/// for the observable effect rather than an exact count.
pub fn wait_until<F: Fn() -> bool>(counter: &CallCounter, cond: F) -> bool {
    let deadline = Instant::now() + RELOAD_TIMEOUT;
    loop {
        let seen = counter.count();
        if cond() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        counter.wait_timeout(seen + 1, deadline - now);
    }
}
