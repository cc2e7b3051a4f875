//! Immutable snapshot manifests.
//!
//! A snapshot freezes the dataset's working tree: every file is hashed into
//! `.datapub/objects/<sha256>` and the tree is recorded in
//! `.datapub/snapshots/<tag>.json`. Manifests are never rewritten.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use datapub_core::error::{io_err, StoreError};
use datapub_core::types::{DatasetId, SnapshotTag};

use crate::writer::digest;

/// Directory name holding dataset metadata; never part of a snapshot tree.
pub const META_DIR: &str = ".datapub";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub tag: SnapshotTag,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<SnapshotTag>,
    /// Tree-relative path (forward slashes) → SHA-256 of the content.
    pub files: BTreeMap<String, String>,
}

pub fn snapshots_dir(dataset_dir: &Path) -> PathBuf {
    dataset_dir.join(META_DIR).join("snapshots")
}

pub fn objects_dir(dataset_dir: &Path) -> PathBuf {
    dataset_dir.join(META_DIR).join("objects")
}

pub fn manifest_path(dataset_dir: &Path, tag: &SnapshotTag) -> PathBuf {
    snapshots_dir(dataset_dir).join(format!("{}.json", tag.0))
}

/// Load the manifest for `tag`.
pub fn load(
    dataset: &DatasetId,
    dataset_dir: &Path,
    tag: &SnapshotTag,
) -> Result<SnapshotManifest, StoreError> {
    tag.validate()?;
    let path = manifest_path(dataset_dir, tag);
    if !path.exists() {
        return Err(StoreError::SnapshotNotFound {
            dataset: dataset.clone(),
            snapshot: tag.clone(),
        });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_json::from_str(&contents).map_err(|e| StoreError::Json { path, source: e })
}

/// All manifests, oldest first (ties broken by tag).
pub fn list(dataset_dir: &Path) -> Result<Vec<SnapshotManifest>, StoreError> {
    let dir = snapshots_dir(dataset_dir);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut manifests = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
        let entry = entry.map_err(|e| io_err(&dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let manifest: SnapshotManifest = serde_json::from_str(&contents)
            .map_err(|e| StoreError::Json { path: path.clone(), source: e })?;
        manifests.push(manifest);
    }
    manifests.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.tag.cmp(&b.tag))
    });
    Ok(manifests)
}

/// Freeze the working tree of `dataset_dir` as `tag`.
///
/// Fails with [`StoreError::SnapshotExists`] if `tag` was already taken and
/// with [`StoreError::InvalidName`] if it cannot name a manifest file.
pub fn create(
    dataset: &DatasetId,
    dataset_dir: &Path,
    tag: &SnapshotTag,
) -> Result<SnapshotManifest, StoreError> {
    tag.validate()?;
    let path = manifest_path(dataset_dir, tag);
    if path.exists() {
        return Err(StoreError::SnapshotExists {
            dataset: dataset.clone(),
            snapshot: tag.clone(),
        });
    }

    let parent = list(dataset_dir)?.pop().map(|m| m.tag);
    let objects = objects_dir(dataset_dir);
    std::fs::create_dir_all(&objects).map_err(|e| io_err(&objects, e))?;

    let mut files = BTreeMap::new();
    for file in collect_tree(dataset_dir)? {
        let content = std::fs::read(&file).map_err(|e| io_err(&file, e))?;
        let hash = digest(&content);
        let object = objects.join(&hash);
        if !object.exists() {
            let tmp = objects.join(format!("{hash}.tmp"));
            std::fs::write(&tmp, &content).map_err(|e| io_err(&tmp, e))?;
            std::fs::rename(&tmp, &object).map_err(|e| io_err(&object, e))?;
        }
        files.insert(tree_key(dataset_dir, &file), hash);
    }

    let manifest = SnapshotManifest {
        tag: tag.clone(),
        created_at: Utc::now(),
        parent,
        files,
    };
    let json = serde_json::to_string_pretty(&manifest).map_err(|e| StoreError::Json {
        path: path.clone(),
        source: e,
    })?;
    let dir = snapshots_dir(dataset_dir);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;

    tracing::info!(
        "snapshot {} of {}: {} file(s)",
        tag,
        dataset,
        manifest.files.len()
    );
    Ok(manifest)
}

/// Read the content of object `hash` from the dataset's object directory.
pub fn read_object(dataset_dir: &Path, hash: &str) -> Result<Vec<u8>, StoreError> {
    let path = objects_dir(dataset_dir).join(hash);
    std::fs::read(&path).map_err(|e| io_err(&path, e))
}

/// Every regular file below `root`, excluding the metadata directory,
/// sorted for deterministic manifests.
fn collect_tree(root: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut files = Vec::new();
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        for entry in std::fs::read_dir(&current).map_err(|e| io_err(&current, e))? {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if ty.is_dir() {
                if current == root && entry.file_name() == META_DIR {
                    continue;
                }
                dirs.push(entry.path());
            } else if ty.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

fn tree_key(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
