//! Push and export transfers.
//!
//! - [`push`] sends the full history. A `file://` remote receives a
//!   directory mirror: every snapshot manifest and every object they
//!   reference, objects before manifests so a remote never lists a snapshot
//!   whose content is missing. Any other git URL goes through [`git::push`].
//! - [`export`] writes the tree of one snapshot into
//!   `<bucket>/<dataset>/`, removes paths the previous export had that this
//!   tree lacks, and records the exported version under `.versions/`.
//!
//! Directory transfers go through the hash-gated [`atomic_write`], so
//! repeating a transfer rewrites nothing, and hold `.datapub/transfer.lock`
//! in the remote directory for their whole duration.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;

use datapub_core::error::{io_err, StoreError};
use datapub_core::types::{DatasetId, RemoteKind, Sibling, SnapshotTag, TransferReceipt};

use crate::git;
use crate::hash_store;
use crate::lock::FileLock;
use crate::snapshot::{self, SnapshotManifest, META_DIR};
use crate::writer::{atomic_write, WriteResult};

/// Resolve a `file://` URL to a local directory.
pub fn remote_path(url: &str) -> Result<PathBuf, StoreError> {
    url.strip_prefix("file://")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| StoreError::UnsupportedRemote(url.to_string()))
}

fn check_kind(sibling: &Sibling, expected: RemoteKind) -> Result<(), StoreError> {
    if sibling.config.kind != expected {
        return Err(StoreError::UnsupportedRemote(format!(
            "sibling {} is a {:?} remote, expected {:?}",
            sibling.name, sibling.config.kind, expected
        )));
    }
    Ok(())
}

fn existing_remote(sibling: &Sibling, expected: RemoteKind) -> Result<PathBuf, StoreError> {
    check_kind(sibling, expected)?;
    let path = remote_path(&sibling.config.url)?;
    if !path.is_dir() {
        return Err(io_err(
            &path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "remote directory missing"),
        ));
    }
    Ok(path)
}

#[derive(Default)]
struct Tally {
    written: usize,
    unchanged: usize,
}

impl Tally {
    fn record(&mut self, result: WriteResult) {
        if result.is_written() {
            self.written += 1;
        } else {
            self.unchanged += 1;
        }
    }
}

/// Exclusive lock on a remote directory for one transfer.
fn lock_remote(remote: &Path) -> Result<FileLock, StoreError> {
    FileLock::acquire(&remote.join(META_DIR).join("transfer.lock"))
}

/// Push every snapshot of the dataset to a git sibling.
pub fn push(
    dataset: &DatasetId,
    dataset_dir: &Path,
    sibling: &Sibling,
) -> Result<TransferReceipt, StoreError> {
    check_kind(sibling, RemoteKind::Git)?;
    let url = &sibling.config.url;
    if url.starts_with("file://") {
        push_directory(dataset, dataset_dir, sibling)
    } else if git::is_git_url(url) {
        git::push(dataset, dataset_dir, sibling)
    } else {
        Err(StoreError::UnsupportedRemote(url.clone()))
    }
}

fn push_directory(
    dataset: &DatasetId,
    dataset_dir: &Path,
    sibling: &Sibling,
) -> Result<TransferReceipt, StoreError> {
    let remote = existing_remote(sibling, RemoteKind::Git)?;
    let _lock = lock_remote(&remote)?;
    let mut store = hash_store::load_at(&remote)?;
    let manifests = snapshot::list(dataset_dir)?;
    let mut tally = Tally::default();

    let objects: BTreeSet<&String> = manifests.iter().flat_map(|m| m.files.values()).collect();
    for hash in objects {
        let key = format!("objects/{hash}");
        let content = snapshot::read_object(dataset_dir, hash)?;
        let result = atomic_write(&remote.join(&key), &key, &content, &mut store.files)?;
        tally.record(result);
    }

    for manifest in &manifests {
        let key = format!("snapshots/{}.json", manifest.tag);
        let json = manifest_json(&remote.join(&key), manifest)?;
        let result = atomic_write(&remote.join(&key), &key, &json, &mut store.files)?;
        tally.record(result);
    }

    store.synced_at = Utc::now();
    hash_store::save_at(&remote, &store)?;

    tracing::info!(
        "pushed {} to {} ({} written, {} unchanged)",
        dataset,
        sibling.config.url,
        tally.written,
        tally.unchanged
    );
    Ok(TransferReceipt {
        sibling: sibling.name.clone(),
        url: sibling.config.url.clone(),
        objects_written: tally.written,
        objects_unchanged: tally.unchanged,
        refs: manifests.into_iter().map(|m| m.tag).collect(),
    })
}

/// Export the tree of `tag` into an object-storage sibling.
pub fn export(
    dataset: &DatasetId,
    dataset_dir: &Path,
    sibling: &Sibling,
    tag: &SnapshotTag,
) -> Result<TransferReceipt, StoreError> {
    let bucket = existing_remote(sibling, RemoteKind::SpecialRemote)?;
    let manifest = snapshot::load(dataset, dataset_dir, tag)?;
    let prefix = bucket.join(&dataset.0);
    let _lock = lock_remote(&prefix)?;
    let mut store = hash_store::load_at(&prefix)?;
    let mut tally = Tally::default();

    for (path, hash) in &manifest.files {
        let content = snapshot::read_object(dataset_dir, hash)?;
        let result = atomic_write(&prefix.join(path), path, &content, &mut store.files)?;
        tally.record(result);
    }

    let stale: Vec<String> = store
        .files
        .keys()
        .filter(|key| !manifest.files.contains_key(*key))
        .cloned()
        .collect();
    for key in stale {
        let path = prefix.join(&key);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("unexported: {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(&path, err)),
        }
        store.files.remove(&key);
    }

    record_version(&prefix, &manifest)?;
    store.synced_at = Utc::now();
    hash_store::save_at(&prefix, &store)?;

    tracing::info!(
        "exported {}@{} to {} ({} written, {} unchanged)",
        dataset,
        tag,
        sibling.config.url,
        tally.written,
        tally.unchanged
    );
    Ok(TransferReceipt {
        sibling: sibling.name.clone(),
        url: sibling.config.url.clone(),
        objects_written: tally.written,
        objects_unchanged: tally.unchanged,
        refs: vec![tag.clone()],
    })
}

/// `<prefix>/.versions/<tag>.json`; written once, versions are immutable.
fn record_version(prefix: &Path, manifest: &SnapshotManifest) -> Result<(), StoreError> {
    let dir = prefix.join(".versions");
    let path = dir.join(format!("{}.json", manifest.tag));
    if path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let json = manifest_json(&path, manifest)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

fn manifest_json(path: &Path, manifest: &SnapshotManifest) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(manifest).map_err(|e| StoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("file:///srv/buckets/public", Some("/srv/buckets/public"))]
    #[case("git@github.com:org/ds1.git", None)]
    #[case("s3://bucket", None)]
    #[case("file://", None)]
    fn remote_path_only_accepts_file_urls(#[case] url: &str, #[case] expected: Option<&str>) {
        assert_eq!(remote_path(url).ok(), expected.map(PathBuf::from));
    }
}
