//! Filesystem dataset store.
//!
//! # Storage layout
//!
//! ```text
//! <store_root>/
//!   <dataset>/                working tree
//!     .datapub/
//!       siblings.yaml         registration list (atomic writes)
//!       siblings.lock         flock held across each read-modify-write
//!       locks/<name>.lock     flock held across a sibling's check-then-create
//!       snapshots/<tag>.json  immutable manifests
//!       objects/<sha256>      content-addressed blobs
//!       git/                  bare mirror pushed to git remotes
//! ```
//!
//! Dataset ids and snapshot tags are validated before they are joined into
//! a path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use datapub_core::error::{io_err, StoreError};
use datapub_core::types::{
    DatasetId, Sibling, SiblingConfig, SiblingName, SnapshotTag, TransferReceipt,
};
use datapub_core::{Dataset, DatasetStore, InvalidName, RegistrationGuard};

use crate::lock::FileLock;
use crate::snapshot::{self, SnapshotManifest, META_DIR};
use crate::transfer;

/// On-disk shape of `siblings.yaml`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SiblingsFile {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

/// Datasets rooted in one directory.
///
/// Handles opened from the same store share a per-dataset lock around
/// `siblings.yaml` read-modify-write cycles; a file lock extends it to
/// other processes.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    registry_locks: Arc<Mutex<HashMap<DatasetId, Arc<Mutex<()>>>>>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registry_locks: Arc::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of dataset `id`, or [`StoreError::InvalidName`] if the id
    /// would not stay a direct child of the root.
    pub fn dataset_dir(&self, id: &DatasetId) -> Result<PathBuf, StoreError> {
        id.validate()?;
        Ok(self.root.join(&id.0))
    }

    /// Create an empty dataset directory. Idempotent.
    pub fn create_dataset(&self, id: &DatasetId) -> Result<LocalDataset, StoreError> {
        let meta = self.dataset_dir(id)?.join(META_DIR);
        std::fs::create_dir_all(&meta).map_err(|e| io_err(&meta, e))?;
        self.open(id)
    }

    /// Open an existing dataset.
    pub fn open(&self, id: &DatasetId) -> Result<LocalDataset, StoreError> {
        let dir = self.dataset_dir(id)?;
        if !dir.is_dir() {
            return Err(StoreError::DatasetNotFound(id.clone()));
        }
        let lock = {
            let mut locks = self
                .registry_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            locks.entry(id.clone()).or_default().clone()
        };
        Ok(LocalDataset {
            id: id.clone(),
            dir,
            registry_lock: lock,
        })
    }

    /// Dataset ids in the store, sorted.
    pub fn list_datasets(&self) -> Result<Vec<DatasetId>, StoreError> {
        if !self.root.exists() {
            return Ok(vec![]);
        }
        let mut ids: Vec<DatasetId> = std::fs::read_dir(&self.root)
            .map_err(|e| io_err(&self.root, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| DatasetId::from(e.file_name().to_string_lossy().into_owned()))
            .filter(|id| id.validate().is_ok())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl DatasetStore for LocalStore {
    fn get_dataset(&self, id: &DatasetId) -> Result<Box<dyn Dataset>, StoreError> {
        Ok(Box::new(self.open(id)?))
    }
}

/// A dataset directory inside a [`LocalStore`].
#[derive(Debug, Clone)]
pub struct LocalDataset {
    id: DatasetId,
    dir: PathBuf,
    registry_lock: Arc<Mutex<()>>,
}

impl LocalDataset {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn siblings_path(&self) -> PathBuf {
        self.dir.join(META_DIR).join("siblings.yaml")
    }

    fn registration_lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(META_DIR).join("locks").join(format!("{name}.lock"))
    }

    /// Freeze the current working tree as `tag`.
    pub fn create_snapshot(&self, tag: &SnapshotTag) -> Result<SnapshotManifest, StoreError> {
        snapshot::create(&self.id, &self.dir, tag)
    }

    pub fn snapshot(&self, tag: &SnapshotTag) -> Result<SnapshotManifest, StoreError> {
        snapshot::load(&self.id, &self.dir, tag)
    }

    pub fn snapshots(&self) -> Result<Vec<SnapshotManifest>, StoreError> {
        snapshot::list(&self.dir)
    }

    fn load_siblings(&self) -> Result<SiblingsFile, StoreError> {
        let path = self.siblings_path();
        if !path.exists() {
            return Ok(SiblingsFile::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        if contents.trim().is_empty() {
            return Ok(SiblingsFile::default());
        }
        serde_yaml::from_str(&contents).map_err(|e| StoreError::Yaml { path, source: e })
    }

    /// Write flow: serialize → `.yaml.tmp` → `rename`.
    fn save_siblings(&self, file: &SiblingsFile) -> Result<(), StoreError> {
        let path = self.siblings_path();
        let yaml = serde_yaml::to_string(file).map_err(|e| StoreError::Yaml {
            path: path.clone(),
            source: e,
        })?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    fn find_sibling(&self, name: &str) -> Result<Sibling, StoreError> {
        self.load_siblings()?
            .siblings
            .into_iter()
            .find(|s| s.name.0 == name)
            .ok_or_else(|| StoreError::SiblingNotFound {
                dataset: self.id.clone(),
                name: SiblingName::from(name),
            })
    }
}

impl Dataset for LocalDataset {
    fn id(&self) -> &DatasetId {
        &self.id
    }

    fn siblings(&self) -> Result<Vec<Sibling>, StoreError> {
        Ok(self.load_siblings()?.siblings)
    }

    fn lock_registration(&self, name: &str) -> Result<RegistrationGuard, StoreError> {
        if name.is_empty() || name.contains(['/', '\\', '.']) {
            return Err(StoreError::InvalidName(InvalidName {
                kind: "sibling name",
                value: name.to_string(),
                reason: "must be a plain file name",
            }));
        }
        Ok(Box::new(FileLock::acquire(&self.registration_lock_path(name))?))
    }

    fn create_sibling(&self, name: &str, config: SiblingConfig) -> Result<Sibling, StoreError> {
        let _guard = self
            .registry_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _file_lock = FileLock::acquire(&self.dir.join(META_DIR).join("siblings.lock"))?;

        let mut file = self.load_siblings()?;
        if file.siblings.iter().any(|s| s.name.0 == name) {
            return Err(StoreError::DuplicateSibling {
                dataset: self.id.clone(),
                name: SiblingName::from(name),
            });
        }
        let sibling = Sibling {
            name: SiblingName::from(name),
            config,
        };
        file.siblings.push(sibling.clone());
        self.save_siblings(&file)?;
        tracing::info!("registered sibling {} on {}", name, self.id);
        Ok(sibling)
    }

    fn push(&self, sibling: &Sibling) -> Result<TransferReceipt, StoreError> {
        let registered = self.find_sibling(&sibling.name.0)?;
        transfer::push(&self.id, &self.dir, &registered)
    }

    fn export(
        &self,
        sibling: &Sibling,
        snapshot: &SnapshotTag,
    ) -> Result<TransferReceipt, StoreError> {
        let registered = self.find_sibling(&sibling.name.0)?;
        transfer::export(&self.id, &self.dir, &registered, snapshot)
    }
}
