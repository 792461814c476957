//! Storage Provider Implementations
//!
//! Durable string key/value stores backing device identity and session
//! records. The file-backed store persists a single JSON object; the
//! in-memory store backs tests and storage-less environments.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::application::ports::{StorageError, StorageProvider};

// =============================================================================
// In-Memory Storage
// =============================================================================

/// Volatile in-process storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    map: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageProvider for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.map.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.map.write().remove(key);
        Ok(())
    }
}

// =============================================================================
// File-Backed Storage
// =============================================================================

/// File-backed storage persisting one JSON object of key/value pairs.
///
/// Writes go through a temporary file and rename so a crash mid-write
/// cannot truncate the store.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl FileStorage {
    /// Open or create a file-backed store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the existing file cannot be read or
    /// parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let cache = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| StorageError(format!("read {}: {e}", path.display())))?;
            serde_json::from_str(&raw)
                .map_err(|e| StorageError(format!("parse {}: {e}", path.display())))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    fn persist(&self, map: &HashMap<String, String>) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(map)
            .map_err(|e| StorageError(format!("serialize store: {e}")))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw)
            .map_err(|e| StorageError(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StorageError(format!("rename {}: {e}", self.path.display())))?;

        Ok(())
    }
}

impl StorageProvider for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.cache.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut map = self.cache.write();
        map.insert(key.to_string(), value.to_string());
        self.persist(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut map = self.cache.write();
        map.remove(key);
        self.persist(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k").unwrap(), None);

        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some("v".to_string()));

        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }

    #[test]
    fn file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session-store.json");

        {
            let storage = FileStorage::open(&path).unwrap();
            storage.set("device_id", "dev-abc").unwrap();
        }

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(
            reopened.get("device_id").unwrap(),
            Some("dev-abc".to_string())
        );
    }

    #[test]
    fn file_storage_remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let storage = FileStorage::open(&path).unwrap();
        storage.set("a", "1").unwrap();
        storage.remove("a").unwrap();

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap(), None);
    }

    #[test]
    fn file_storage_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(FileStorage::open(&path).is_err());
    }
}
