//! Minimal key-value storage capability.
//!
//! The room cache and the user profile need exactly four operations from
//! their backing store. Keeping the trait this small makes the cache honest
//! about its storage dependency and lets tests run against an in-memory
//! store with a synthetic quota.
//!
//! The store may be shared across tabs or processes; nothing here
//! coordinates concurrent writers beyond the backend's own atomicity, so a
//! shared key follows last-writer-wins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

/// Errors from a key-value store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store is out of space for the attempted write. Callers may free
    /// space and retry.
    #[error("storage quota exceeded")]
    QuotaExceeded,
    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Capability trait for the client's locally persisted state.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key. Deleting a missing key is not an error.
    fn remove(&self, key: &str);

    /// Enumerate keys starting with `prefix`, in a stable order.
    fn list_keys(&self, prefix: &str) -> Vec<String>;
}

/// Session-scoped in-memory store.
///
/// An optional byte quota (total of key and value lengths) makes
/// quota-failure paths exercisable without a real constrained backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    /// Create an unbounded in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes once `quota_bytes` would be
    /// exceeded.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn used_bytes(entries: &HashMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().unwrap();
        if let Some(quota) = self.quota_bytes {
            let replaced = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let projected = Self::used_bytes(&entries) - replaced + key.len() + value.len();
            if projected > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.write().unwrap().remove(key);
    }

    fn list_keys(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

/// Persistent store keeping one file per key.
///
/// Keys are base64-url encoded into filenames so arbitrary key strings
/// (slashes included) survive the filesystem.
pub struct FsStore {
    dir: PathBuf,
    quota_bytes: Option<u64>,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self {
            dir,
            quota_bytes: None,
        })
    }

    /// Open the default per-user store under the platform data directory.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn open_default() -> Result<Self, StorageError> {
        let base = dirs::data_dir()
            .ok_or_else(|| StorageError::Backend("no platform data directory".to_string()))?;
        Self::open(base.join("coscribe"))
    }

    /// Apply a total-size quota in bytes.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.kv", URL_SAFE_NO_PAD.encode(key)))
    }

    fn used_bytes(&self) -> u64 {
        std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

impl KeyValueStore for FsStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota_bytes {
            let replaced = std::fs::metadata(self.path_for(key))
                .map(|m| m.len())
                .unwrap_or(0);
            if self.used_bytes().saturating_sub(replaced) + value.len() as u64 > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        std::fs::write(self.path_for(key), value).map_err(|e| match e.kind() {
            std::io::ErrorKind::StorageFull => StorageError::QuotaExceeded,
            _ => StorageError::Backend(e.to_string()),
        })
    }

    fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }

    fn list_keys(&self, prefix: &str) -> Vec<String> {
        let mut keys = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Some(encoded) = name.strip_suffix(".kv") else {
                    continue;
                };
                if let Ok(bytes) = URL_SAFE_NO_PAD.decode(encoded)
                    && let Ok(key) = String::from_utf8(bytes)
                    && key.starts_with(prefix)
                {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        keys
    }
}
