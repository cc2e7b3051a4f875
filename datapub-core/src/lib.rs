//! Datapub core library: domain types, realm policy, configuration, errors,
//! and the collaborator traits the publish pipeline is written against.
//!
//! Public API surface:
//! - [`types`]: newtypes, targets, siblings, publish reports
//! - [`realm`]: [`targets_for`], the realm → target policy
//! - [`config`]: [`PublishConfig`] load / save
//! - [`error`]: [`PublishError`], [`StoreError`], [`ConfigError`]
//! - [`dataset`] / [`provider`]: traits implemented by stores and remote hosts

pub mod config;
pub mod dataset;
pub mod error;
pub mod provider;
pub mod realm;
pub mod types;

pub use config::{
    DaemonConfig, GitCredentials, HostedGitConfig, HostedGitProviderKind, ObjectStorageConfig,
    PublishConfig,
};
pub use dataset::{Dataset, DatasetStore, RegistrationGuard};
pub use error::{ConfigError, InvalidName, PublishError, StoreError};
pub use provider::{
    CreateRepository, HostedGitProvider, ObjectStorageProvider, ProviderError, RemoteDescriptor,
};
pub use realm::targets_for;
pub use types::{
    AccessProtocol, DatasetId, PublishReport, Realm, RemoteKind, Sibling, SiblingConfig,
    SiblingName, SnapshotTag, TargetId, TargetKind, TargetOutcome, TargetResult, TargetState,
    TransferReceipt,
};
