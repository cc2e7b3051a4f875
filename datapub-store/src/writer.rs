//! Atomic, hash-gated object writer.
//!
//! ## `atomic_write`: 6-step protocol
//!
//! 1. SHA-256 hash the content.
//! 2. Hash the file currently at the path → skip if identical.
//! 3. Ensure the parent directory exists.
//! 4. Write to `<path>.datapub.tmp`.
//! 5. Rename to final path (atomic on POSIX).
//! 6. Update the hash store entry (caller saves the store).
//!
//! The hash store records what was transferred; it is never trusted to say
//! what is on the remote now, so altered objects are repaired on the next
//! write.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use datapub_core::error::{io_err, StoreError};

use crate::hash_store::HashStore;

/// Outcome of an individual object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Object was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// Object was skipped; the file on disk already holds this content.
    Unchanged { path: PathBuf },
}

impl WriteResult {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }
}

/// Hex SHA-256 digest of `content`.
pub fn digest(content: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(content);
    hex::encode(h.finalize())
}

/// Atomically write `content` to `path`, keyed in `hashes` by `key`.
pub fn atomic_write(
    path: &Path,
    key: &str,
    content: &[u8],
    hashes: &mut HashStore,
) -> Result<WriteResult, StoreError> {
    let tmp = PathBuf::from(format!("{}.datapub.tmp", path.display()));
    atomic_write_with_tmp(path, key, content, hashes, &tmp)
}

fn atomic_write_with_tmp(
    path: &Path,
    key: &str,
    content: &[u8],
    hashes: &mut HashStore,
    tmp: &Path,
) -> Result<WriteResult, StoreError> {
    let digest = digest(content);

    if on_disk_digest(path)?.as_deref() == Some(digest.as_str()) {
        tracing::debug!("unchanged: {}", path.display());
        hashes.insert(key.to_string(), digest);
        return Ok(WriteResult::Unchanged {
            path: path.to_path_buf(),
        });
    }
    if hashes.get(key) == Some(&digest) {
        tracing::warn!("repairing altered object: {}", path.display());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if let Some(tmp_parent) = tmp.parent() {
        std::fs::create_dir_all(tmp_parent).map_err(|e| io_err(tmp_parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    hashes.insert(key.to_string(), digest);

    tracing::debug!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

/// Digest of the file at `path`, or `None` if there is no such file.
fn on_disk_digest(path: &Path) -> Result<Option<String>, StoreError> {
    match std::fs::read(path) {
        Ok(existing) => Ok(Some(digest(&existing))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn first_write_returns_written() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sub-01/anat/T1w.nii");
        let mut store = BTreeMap::new();
        let result = atomic_write(&path, "sub-01/anat/T1w.nii", b"nifti", &mut store).unwrap();
        assert!(result.is_written());
        assert_eq!(fs::read(&path).unwrap(), b"nifti");
    }

    #[test]
    fn second_write_same_content_returns_unchanged() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("README");
        let mut store = BTreeMap::new();
        atomic_write(&path, "README", b"same", &mut store).unwrap();
        let result = atomic_write(&path, "README", b"same", &mut store).unwrap();
        assert!(matches!(result, WriteResult::Unchanged { .. }));
    }

    #[test]
    fn deleted_file_is_rewritten_even_with_matching_hash() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("README");
        let mut store = BTreeMap::new();
        atomic_write(&path, "README", b"same", &mut store).unwrap();
        fs::remove_file(&path).unwrap();
        let result = atomic_write(&path, "README", b"same", &mut store).unwrap();
        assert!(result.is_written());
    }

    #[test]
    fn altered_file_is_rewritten_even_with_matching_hash() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("README");
        let mut store = BTreeMap::new();
        atomic_write(&path, "README", b"same", &mut store).unwrap();
        fs::write(&path, "CORRUPT").unwrap();
        let result = atomic_write(&path, "README", b"same", &mut store).unwrap();
        assert!(result.is_written());
        assert_eq!(fs::read(&path).unwrap(), b"same");
    }

    #[test]
    fn matching_file_without_hash_entry_is_unchanged_and_recorded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("README");
        fs::write(&path, "same").unwrap();
        let mut store = BTreeMap::new();
        let result = atomic_write(&path, "README", b"same", &mut store).unwrap();
        assert!(!result.is_written());
        assert_eq!(store.get("README"), Some(&digest(b"same")));
    }

    #[test]
    fn tmp_file_removed_after_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("clean");
        let mut store = BTreeMap::new();
        atomic_write(&path, "clean", b"data", &mut store).unwrap();
        let tmp_path = PathBuf::from(format!("{}.datapub.tmp", path.display()));
        assert!(!tmp_path.exists(), ".datapub.tmp must be cleaned up");
    }

    #[test]
    #[cfg(unix)]
    fn rename_failure_leaves_original_and_cleans_tmp() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let readonly_dir = root.path().join("readonly");
        fs::create_dir_all(&readonly_dir).unwrap();
        let path = readonly_dir.join("file");
        fs::write(&path, "original").unwrap();

        let mut perms = fs::metadata(&readonly_dir).unwrap().permissions();
        perms.set_mode(0o555);
        fs::set_permissions(&readonly_dir, perms).unwrap();

        let tmp_dir = TempDir::new().unwrap();
        let tmp_path = tmp_dir.path().join("file.datapub.tmp");

        let mut store = BTreeMap::new();
        let err = atomic_write_with_tmp(&path, "file", b"new content", &mut store, &tmp_path);

        let mut perms = fs::metadata(&readonly_dir).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&readonly_dir, perms).unwrap();

        // Running as root bypasses directory permissions.
        if err.is_ok() {
            return;
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
        assert!(!tmp_path.exists(), ".datapub.tmp should be cleaned up");
        assert!(store.is_empty(), "failed write must not record a hash");
    }
}
