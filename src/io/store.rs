//! Key/value persistence backends
//!
//! Records are stored as JSON strings under fixed keys. `FileStore` keeps one
//! `<key>.json` file per record in a directory; `MemoryStore` keeps them in a
//! map and can be told to fail writes.

use crate::domain::error::{Result, TrackerError};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Directory-backed store, one JSON file per key
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        info!(dir = %dir.display(), "file_store_initialized");
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::Persistence(format!("read {}: {e}", path.display()))),
        }
    }

    /// Write via a temp file and rename so a crash never leaves half a record
    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));

        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|e| {
                TrackerError::Persistence(format!("create {}: {e}", self.dir.display()))
            })?;
        }

        fs::write(&tmp, value)
            .map_err(|e| TrackerError::Persistence(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| TrackerError::Persistence(format!("rename {}: {e}", path.display())))?;

        debug!(key = %key, bytes = %value.len(), "store_written");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TrackerError::Persistence(format!("remove {}: {e}", path.display()))),
        }
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<FxHashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`remove` fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(TrackerError::Persistence(format!("write {key}: store unavailable")));
        }
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(TrackerError::Persistence(format!("remove {key}: store unavailable")));
        }
        self.entries.lock().remove(key);
        Ok(())
    }
}
