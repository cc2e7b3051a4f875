//! Advisory file locks.
//!
//! In-process mutexes only order threads of one process; a `datapub publish`
//! run and the daemon can share a store, so registration and transfer
//! critical sections also hold an exclusive `flock` on a lock file. Locks on
//! separately opened descriptors conflict even within one process.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use datapub_core::error::{io_err, StoreError};

/// Exclusive lock on a file, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until `path` is exclusively locked. Creates the file and its
    /// parent directory when missing.
    pub fn acquire(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        FileExt::lock_exclusive(&file).map_err(|e| io_err(path, e))?;
        tracing::debug!("locked {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well.
        let _ = FileExt::unlock(&self.file);
        tracing::debug!("unlocked {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_missing_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".datapub/locks/siblings.lock");
        let lock = FileLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path.as_path());
    }

    #[test]
    fn second_holder_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transfer.lock");
        let first = FileLock::acquire(&path).unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        std::thread::scope(|scope| {
            let flag = acquired.clone();
            let path = path.clone();
            scope.spawn(move || {
                let _second = FileLock::acquire(&path).unwrap();
                flag.store(true, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(100));
            assert!(!acquired.load(Ordering::SeqCst), "lock must still be held");
            drop(first);
        });
        assert!(acquired.load(Ordering::SeqCst));
    }
}
