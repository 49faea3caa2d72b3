//! String-keyed, string-valued persistence backends for the session store.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Session length of {0} days is out of range")]
    ExpiryOutOfRange(u32),
}

/// A single key change inside a batch: `Some` writes the value, `None` removes the key.
pub type Change<'a> = (&'a str, Option<String>);

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Apply several changes together. Backends that can make the whole batch
    /// visible at once (e.g. a single file replace) override this.
    fn write_batch(&self, changes: &[Change<'_>]) -> Result<(), StorageError> {
        for (key, value) in changes {
            match value {
                Some(value) => self.set(key, value)?,
                None => self.remove(key)?,
            }
        }
        Ok(())
    }
}

/// In-process storage. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry, taken under one lock.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn write_batch(&self, changes: &[Change<'_>]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in changes {
            match value {
                Some(value) => entries.insert(key.to_string(), value.clone()),
                None => entries.remove(*key),
            };
        }
        Ok(())
    }
}

/// Storage backed by a single JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so other processes see either the old or the new map. A file that
/// does not parse is deleted and read as empty.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&contents) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Discarding unreadable storage file");
                std::fs::remove_file(&self.path)?;
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if map.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(map)?;
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = ?self.path, keys = map.len(), "Storage file written");
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write_batch(&[(key, Some(value.to_string()))])
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.write_batch(&[(key, None)])
    }

    fn write_batch(&self, changes: &[Change<'_>]) -> Result<(), StorageError> {
        let mut map = self.read_map()?;
        for (key, value) in changes {
            match value {
                Some(value) => map.insert(key.to_string(), value.clone()),
                None => map.remove(*key),
            };
        }
        self.write_map(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_clones_share_entries() {
        let storage = MemoryStorage::new();
        let view = storage.clone();

        storage.set("authToken", "abc").unwrap();
        assert_eq!(view.get("authToken").unwrap().as_deref(), Some("abc"));

        view.remove("authToken").unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_memory_storage_batch() {
        let storage = MemoryStorage::new();
        storage.set("stale", "1").unwrap();

        storage
            .write_batch(&[("a", Some("1".to_string())), ("b", Some("2".to_string())), ("stale", None)])
            .unwrap();

        assert_eq!(storage.len(), 2);
        assert_eq!(storage.get("b").unwrap().as_deref(), Some("2"));
        assert_eq!(storage.get("stale").unwrap(), None);
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        FileStorage::new(&path).set("authToken", "t1").unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get("authToken").unwrap().as_deref(), Some("t1"));
        assert_eq!(reopened.get("missing").unwrap(), None);
    }

    #[test]
    fn test_file_storage_removes_file_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("session.json"));

        storage
            .write_batch(&[("a", Some("1".to_string())), ("b", Some("2".to_string()))])
            .unwrap();
        assert!(storage.path().exists());

        storage.write_batch(&[("a", None), ("b", None)]).unwrap();
        assert!(!storage.path().exists());
        assert!(!storage.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_storage_discards_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{truncated").unwrap();

        let storage = FileStorage::new(&path);
        assert_eq!(storage.get("authToken").unwrap(), None);
        assert!(!path.exists());

        std::fs::write(&path, "not json").unwrap();
        storage.set("authToken", "t2").unwrap();
        assert_eq!(storage.get("authToken").unwrap().as_deref(), Some("t2"));
    }
}
