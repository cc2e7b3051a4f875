//! Hash store: SHA-256-based idempotency tracking for transferred objects.
//!
//! Each remote (bucket prefix or git mirror) persists a `HashStoreFile` JSON
//! document at `<remote>/.datapub/hashes.json`.
//! Writes use the same atomic `.tmp` + rename pattern as sibling registries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use datapub_core::error::{io_err, StoreError};

/// In-memory hash store: maps remote-relative object keys to their last
/// transferred SHA-256 hex digest.
pub type HashStore = BTreeMap<String, String>;

/// On-disk hash store payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashStoreFile {
    pub synced_at: DateTime<Utc>,
    pub files: HashStore,
}

/// `<remote>/.datapub/hashes.json`
pub fn store_path_at(remote: &Path) -> PathBuf {
    remote.join(".datapub").join("hashes.json")
}

/// Load the hash store for `remote`; empty if the file does not yet exist.
pub fn load_at(remote: &Path) -> Result<HashStoreFile, StoreError> {
    let path = store_path_at(remote);
    if !path.exists() {
        return Ok(HashStoreFile {
            synced_at: Utc::now(),
            files: HashStore::new(),
        });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_json::from_str(&contents).map_err(|e| StoreError::Json { path, source: e })
}

/// Save the hash store for `remote` atomically.
pub fn save_at(remote: &Path, store: &HashStoreFile) -> Result<(), StoreError> {
    let path = store_path_at(remote);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid hash store path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(store).map_err(|e| StoreError::Json {
        path: path.clone(),
        source: e,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_store_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let store = load_at(tmp.path()).unwrap();
        assert!(store.files.is_empty());
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut files = HashStore::new();
        files.insert("dataset_description.json".to_string(), "deadbeef".to_string());
        let store = HashStoreFile {
            synced_at: Utc::now(),
            files,
        };
        save_at(tmp.path(), &store).unwrap();
        assert_eq!(load_at(tmp.path()).unwrap(), store);
        assert!(!store_path_at(tmp.path()).with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_store_is_json_error() {
        let tmp = TempDir::new().unwrap();
        let path = store_path_at(tmp.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_at(tmp.path()), Err(StoreError::Json { .. })));
    }
}
