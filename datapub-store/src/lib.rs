//! # datapub-store
//!
//! Filesystem dataset store with content-addressed snapshots.
//!
//! [`LocalStore`] implements [`datapub_core::DatasetStore`]. The datasets it
//! hands out register siblings in `siblings.yaml` and push their full
//! history to git remotes, either as a `file://` directory mirror or through
//! the `git` CLI ([`git`]). Single snapshots are exported into bucket
//! directories through the hash-gated atomic [`writer`]. Cross-process
//! critical sections hold a [`lock::FileLock`].

pub mod git;
pub mod hash_store;
pub mod lock;
pub mod snapshot;
pub mod store;
pub mod transfer;
pub mod writer;

pub use snapshot::SnapshotManifest;
pub use store::{LocalDataset, LocalStore};
pub use writer::WriteResult;
