//! Key-value persistence for preferences and the keychain.
//!
//! The wallet keeps two stores: non-secret preferences (cached balance,
//! backup flag, migrated addresses, backup hints) and the keychain holding
//! keystores. Both go through [`KeyValueStore`]; [`StoreExt`] layers typed
//! access on top.

use crate::error::WalletError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// JSON-valued key-value storage.
///
/// A missing key is `Ok(None)`, never an error.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, WalletError>;
    fn set(&self, key: &str, value: Value) -> Result<(), WalletError>;
    fn remove(&self, key: &str) -> Result<(), WalletError>;
}

/// Typed helpers over any [`KeyValueStore`].
pub trait StoreExt: KeyValueStore {
    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, WalletError> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| WalletError::Storage(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), WalletError> {
        let value = serde_json::to_value(value)
            .map_err(|e| WalletError::Storage(format!("{}: {}", key, e)))?;
        self.set(key, value)
    }

    /// Boolean flag; absent or unreadable reads as `false`.
    fn flag(&self, key: &str) -> bool {
        matches!(self.load::<bool>(key), Ok(Some(true)))
    }
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, WalletError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), WalletError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), WalletError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// File-backed store
// =============================================================================

/// A store persisted as one JSON object on disk.
///
/// Every mutation rewrites the file through a temporary sibling followed by a
/// rename, so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed.
    /// A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| WalletError::Storage(format!("{}: {}", parent.display(), e)))?;
            }
        }

        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| WalletError::Storage(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(WalletError::Storage(format!("{}: {}", path.display(), e))),
        };

        log::debug!("opened store {} ({} keys)", path.display(), entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<(), WalletError> {
        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)
            .map_err(|e| WalletError::Storage(format!("{}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| WalletError::Storage(format!("{}: {}", self.path.display(), e)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, WalletError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), WalletError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        let previous = entries.insert(key.to_string(), value);
        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(v) => entries.insert(key.to_string(), v),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), WalletError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        if let Some(previous) = entries.remove(key) {
            if let Err(e) = self.persist(&entries) {
                entries.insert(key.to_string(), previous);
                return Err(e);
            }
        }
        Ok(())
    }
}
