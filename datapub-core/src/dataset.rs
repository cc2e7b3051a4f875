//! Dataset collaborator traits.
//!
//! The publish pipeline only ever talks to a dataset through [`Dataset`];
//! `datapub-store` provides the filesystem implementation.

use crate::error::StoreError;
use crate::types::{DatasetId, Sibling, SiblingConfig, SnapshotTag, TransferReceipt};

/// Held while a sibling is looked up and registered; dropping it releases
/// the registration lock.
pub type RegistrationGuard = Box<dyn Send>;

/// Handle to a version-controlled dataset.
pub trait Dataset: Send + Sync {
    fn id(&self) -> &DatasetId;

    /// Current sibling registrations, in registration order.
    fn siblings(&self) -> Result<Vec<Sibling>, StoreError>;

    /// Serialize the check-then-create of sibling `name` with every other
    /// process using this dataset until the guard is dropped.
    fn lock_registration(&self, name: &str) -> Result<RegistrationGuard, StoreError>;

    /// Register a new sibling. Fails with [`StoreError::DuplicateSibling`]
    /// if `name` is already registered.
    fn create_sibling(&self, name: &str, config: SiblingConfig) -> Result<Sibling, StoreError>;

    /// Push the full history (every snapshot tag) to a git sibling.
    fn push(&self, sibling: &Sibling) -> Result<TransferReceipt, StoreError>;

    /// Export the tree of `snapshot` only into an object-storage sibling.
    fn export(&self, sibling: &Sibling, snapshot: &SnapshotTag)
        -> Result<TransferReceipt, StoreError>;
}

/// Registry of datasets.
pub trait DatasetStore: Send + Sync {
    fn get_dataset(&self, id: &DatasetId) -> Result<Box<dyn Dataset>, StoreError>;
}
