//! Error types for datapub-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{DatasetId, SiblingName, SnapshotTag, TargetId};

/// Publish-level error taxonomy.
///
/// `Configuration` and `InvalidRealm` abort an invocation; `Provisioning`
/// and `Transfer` are recorded against their target and retried by a fresh
/// invocation.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Credentials or organization for a provider are not configured.
    #[error("configuration error for target {target}: {message}")]
    Configuration { target: TargetId, message: String },

    /// Sibling setup (remote repository or bucket binding) failed.
    #[error("failed to provision sibling for target {target}: {message}")]
    Provisioning { target: TargetId, message: String },

    /// Push or export to an already provisioned sibling failed.
    #[error("transfer to target {target} failed: {message}")]
    Transfer { target: TargetId, message: String },

    /// The requested realm is not one of PRIVATE / PUBLIC.
    #[error("invalid realm '{0}'; expected PRIVATE or PUBLIC")]
    InvalidRealm(String),

    #[error(transparent)]
    InvalidName(#[from] InvalidName),

    /// The dataset could not be opened from the store.
    #[error("cannot open dataset {dataset}: {source}")]
    Dataset {
        dataset: DatasetId,
        #[source]
        source: StoreError,
    },

    /// At least one target of an otherwise completed invocation failed.
    #[error("publish failed for target(s): {}", join_targets(.failed))]
    PartialFailure { failed: Vec<TargetId> },
}

impl PublishError {
    /// Whether a fresh invocation may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PublishError::Provisioning { .. }
            | PublishError::Transfer { .. }
            | PublishError::PartialFailure { .. } => true,
            PublishError::Dataset { source, .. } => source.is_transient(),
            PublishError::Configuration { .. }
            | PublishError::InvalidRealm(_)
            | PublishError::InvalidName(_) => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// The target a per-target error was raised for.
    pub fn target(&self) -> Option<TargetId> {
        match self {
            PublishError::Configuration { target, .. }
            | PublishError::Provisioning { target, .. }
            | PublishError::Transfer { target, .. } => Some(*target),
            _ => None,
        }
    }
}

fn join_targets(targets: &[TargetId]) -> String {
    targets
        .iter()
        .map(|t| t.sibling_name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A dataset id or snapshot tag that cannot name a directory, file or git
/// tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} '{value}': {reason}")]
pub struct InvalidName {
    pub kind: &'static str,
    pub value: String,
    pub reason: &'static str,
}

/// Errors raised by dataset stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("dataset {0} not found")]
    DatasetNotFound(DatasetId),

    #[error("snapshot {snapshot} not found in dataset {dataset}")]
    SnapshotNotFound {
        dataset: DatasetId,
        snapshot: SnapshotTag,
    },

    #[error("snapshot {snapshot} already exists in dataset {dataset}")]
    SnapshotExists {
        dataset: DatasetId,
        snapshot: SnapshotTag,
    },

    #[error("sibling {name} is already registered on dataset {dataset}")]
    DuplicateSibling {
        dataset: DatasetId,
        name: SiblingName,
    },

    #[error("sibling {name} is not registered on dataset {dataset}")]
    SiblingNotFound {
        dataset: DatasetId,
        name: SiblingName,
    },

    #[error("unsupported remote url '{0}'")]
    UnsupportedRemote(String),

    /// An external `git` invocation failed.
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error(transparent)]
    InvalidName(#[from] InvalidName),
}

impl StoreError {
    /// I/O and git transport failures may clear up on retry; everything
    /// else needs an operator.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io { .. } | StoreError::Git { .. })
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// Errors loading or saving [`crate::config::PublishConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.datapub/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
