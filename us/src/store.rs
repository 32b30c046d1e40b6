//! Core key-value store implementations

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt store file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A flat get/set/unset store keyed by string
pub trait KeyValueStore {
    /// Fetch the value stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove `key`; removing an absent key is not an error
    fn unset(&mut self, key: &str) -> Result<(), StoreError>;

    /// All keys currently stored, in sorted order
    fn keys(&self) -> Vec<String>;

    /// Fetch a string value; non-string values read as absent
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get(key)?.and_then(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        }))
    }
}

/// Process-local store, lost on exit
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        debug!(key, "MemoryStore::set: called");
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn unset(&mut self, key: &str) -> Result<(), StoreError> {
        debug!(key, "MemoryStore::unset: called");
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Store persisted as a single JSON object file
///
/// Every mutation rewrites the whole file through a temp file and a rename,
/// so readers never observe a partially written store.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed
    ///
    /// A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let entries = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                    path: path.clone(),
                    source,
                })?
            }
        } else {
            BTreeMap::new()
        };

        debug!(?path, entries = entries.len(), "Opened unit store");
        Ok(Self { path, entries })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&self.entries)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, content).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        debug!(key, "FileStore::set: called");
        self.entries.insert(key.to_string(), value);
        self.persist()
    }

    fn unset(&mut self, key: &str) -> Result<(), StoreError> {
        debug!(key, "FileStore::unset: called");
        if self.entries.remove(key).is_some() {
            self.persist()?;
            info!(key, "Removed store entry");
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_set_get_unset() {
        let mut store = MemoryStore::new();
        assert!(store.is_empty());

        store.set("gcp.instance", json!("i-abc")).unwrap();
        assert_eq!(store.get_string("gcp.instance").unwrap(), Some("i-abc".to_string()));

        store.unset("gcp.instance").unwrap();
        assert_eq!(store.get("gcp.instance").unwrap(), None);

        // Unsetting twice is fine
        store.unset("gcp.instance").unwrap();
    }

    #[test]
    fn test_get_string_ignores_non_strings() {
        let mut store = MemoryStore::new();
        store.set("count", json!(3)).unwrap();
        assert_eq!(store.get_string("count").unwrap(), None);
        assert_eq!(store.get("count").unwrap(), Some(json!(3)));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("store.json");

        {
            let mut store = FileStore::open(&path).unwrap();
            store.set("gcp.zone", json!("us-east1-b")).unwrap();
            store.set("gcp.request.i-abc", json!("deadbeef")).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get_string("gcp.zone").unwrap(), Some("us-east1-b".to_string()));
        assert_eq!(store.keys(), vec!["gcp.request.i-abc".to_string(), "gcp.zone".to_string()]);
    }

    #[test]
    fn test_file_store_unset_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");

        let mut store = FileStore::open(&path).unwrap();
        store.set("a", json!(true)).unwrap();
        store.unset("a").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert!(reopened.keys().is_empty());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        fs::write(&path, "not json").unwrap();

        let err = FileStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(err.to_string().contains("store.json"));
    }

    #[test]
    fn test_file_store_empty_file_is_empty_store() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        fs::write(&path, "").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.keys().is_empty());
    }
}
