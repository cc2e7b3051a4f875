//! Domain types for dataset publishing.
//!
//! Realms and targets are closed enums; every realm → target decision is an
//! exhaustive `match`, never a string lookup. All registration types are
//! serializable via serde (`siblings.yaml`, daemon status payloads).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{InvalidName, PublishError};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a dataset in the store (also its logical name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetId(pub String);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DatasetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DatasetId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl DatasetId {
    /// The id must be usable as a single directory name under the store root.
    pub fn validate(&self) -> Result<(), InvalidName> {
        check_component("dataset id", &self.0)
    }
}

impl FromStr for DatasetId {
    type Err = InvalidName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Self::from(s);
        id.validate()?;
        Ok(id)
    }
}

/// An immutable, named point in a dataset's history (a tag).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotTag(pub String);

impl fmt::Display for SnapshotTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SnapshotTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SnapshotTag {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl SnapshotTag {
    /// A tag names a manifest file, an exported version file and a git tag,
    /// so it must be a valid single path component and git ref name.
    pub fn validate(&self) -> Result<(), InvalidName> {
        const KIND: &str = "snapshot tag";
        check_component(KIND, &self.0)?;
        let invalid = |reason| InvalidName {
            kind: KIND,
            value: self.0.clone(),
            reason,
        };
        if self.0.contains(['~', '^', ':', '?', '*', '[']) || self.0.contains("@{") {
            return Err(invalid("must not contain ~ ^ : ? * [ or @{"));
        }
        if self.0.ends_with('.') || self.0.ends_with(".lock") || self.0 == "@" {
            return Err(invalid("is not a valid git tag name"));
        }
        Ok(())
    }
}

impl FromStr for SnapshotTag {
    type Err = InvalidName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = Self::from(s);
        tag.validate()?;
        Ok(tag)
    }
}

/// Rules shared by every name that becomes one path component.
fn check_component(kind: &'static str, value: &str) -> Result<(), InvalidName> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.starts_with('.') {
        "must not start with '.'"
    } else if value.contains(['/', '\\']) {
        "must not contain path separators"
    } else if value.contains("..") {
        "must not contain '..'"
    } else if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "must not contain whitespace or control characters"
    } else {
        return Ok(());
    };
    Err(InvalidName {
        kind,
        value: value.to_string(),
        reason,
    })
}

/// Name of a sibling registration on a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiblingName(pub String);

impl fmt::Display for SiblingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SiblingName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SiblingName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Realms and targets
// ---------------------------------------------------------------------------

/// Visibility tier of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Realm {
    #[default]
    Private,
    Public,
}

impl Realm {
    /// The object-storage target holding this realm's exports.
    pub fn object_storage_target(self) -> TargetId {
        match self {
            Realm::Private => TargetId::ObjectStoragePrivate,
            Realm::Public => TargetId::ObjectStoragePublic,
        }
    }

    /// Whether a hosted-git repository is also published for this realm.
    pub fn requires_hosted_git(self) -> bool {
        match self {
            Realm::Private => false,
            Realm::Public => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Realm::Private => "PRIVATE",
            Realm::Public => "PUBLIC",
        }
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Realm {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PRIVATE" => Ok(Realm::Private),
            "PUBLIC" => Ok(Realm::Public),
            _ => Err(PublishError::InvalidRealm(s.to_string())),
        }
    }
}

/// A remote destination a snapshot can be published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetId {
    #[serde(rename = "s3-PRIVATE")]
    ObjectStoragePrivate,
    #[serde(rename = "s3-PUBLIC")]
    ObjectStoragePublic,
    #[serde(rename = "github")]
    HostedGit,
}

/// What sort of remote a target is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    ObjectStorage(Realm),
    HostedGit,
}

impl TargetId {
    /// Sibling registration name used on the dataset for this target.
    pub fn sibling_name(self) -> &'static str {
        match self {
            TargetId::ObjectStoragePrivate => "s3-PRIVATE",
            TargetId::ObjectStoragePublic => "s3-PUBLIC",
            TargetId::HostedGit => "github",
        }
    }

    pub fn kind(self) -> TargetKind {
        match self {
            TargetId::ObjectStoragePrivate => TargetKind::ObjectStorage(Realm::Private),
            TargetId::ObjectStoragePublic => TargetKind::ObjectStorage(Realm::Public),
            TargetId::HostedGit => TargetKind::HostedGit,
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sibling_name())
    }
}

// ---------------------------------------------------------------------------
// Siblings
// ---------------------------------------------------------------------------

/// Transport a git sibling is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessProtocol {
    #[default]
    Ssh,
    Https,
}

/// Whether a sibling receives git history or exported content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteKind {
    /// Receives the full history via push.
    Git,
    /// Receives exported snapshot trees (object storage).
    SpecialRemote,
}

/// Connection details stored with a sibling registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiblingConfig {
    pub kind: RemoteKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_protocol: Option<AccessProtocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

/// A named remote registration on a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sibling {
    pub name: SiblingName,
    #[serde(flatten)]
    pub config: SiblingConfig,
}

// ---------------------------------------------------------------------------
// Publish results
// ---------------------------------------------------------------------------

/// Handle describing a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub sibling: SiblingName,
    pub url: String,
    pub objects_written: usize,
    pub objects_unchanged: usize,
    /// Snapshot tags present on the remote after the transfer.
    pub refs: Vec<SnapshotTag>,
}

/// Per-target progress within one publish invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetState {
    Pending,
    ResolvingSibling,
    Transferring,
    Succeeded,
    Failed,
}

impl TargetState {
    /// Forward-only transitions; a failed target is only retried by a fresh
    /// invocation starting again at `Pending`.
    pub fn can_advance_to(self, next: TargetState) -> bool {
        matches!(
            (self, next),
            (TargetState::Pending, TargetState::ResolvingSibling)
                | (TargetState::ResolvingSibling, TargetState::Transferring)
                | (TargetState::ResolvingSibling, TargetState::Failed)
                | (TargetState::Transferring, TargetState::Succeeded)
                | (TargetState::Transferring, TargetState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TargetState::Succeeded | TargetState::Failed)
    }
}

/// Outcome of publishing a snapshot to one target.
#[derive(Debug)]
pub enum TargetOutcome {
    Succeeded(TransferReceipt),
    Failed(PublishError),
}

impl TargetOutcome {
    pub fn state(&self) -> TargetState {
        match self {
            TargetOutcome::Succeeded(_) => TargetState::Succeeded,
            TargetOutcome::Failed(_) => TargetState::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TargetOutcome::Succeeded(_))
    }
}

#[derive(Debug)]
pub struct TargetResult {
    pub target: TargetId,
    pub outcome: TargetOutcome,
}

/// Per-target results of one publish invocation, in realm-policy order.
#[derive(Debug)]
pub struct PublishReport {
    pub dataset: DatasetId,
    pub snapshot: SnapshotTag,
    pub realm: Realm,
    pub results: Vec<TargetResult>,
}

impl PublishReport {
    pub fn get(&self, target: TargetId) -> Option<&TargetOutcome> {
        self.results
            .iter()
            .find(|r| r.target == target)
            .map(|r| &r.outcome)
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_success())
    }

    pub fn failed_targets(&self) -> Vec<TargetId> {
        self.results
            .iter()
            .filter(|r| !r.outcome.is_success())
            .map(|r| r.target)
            .collect()
    }

    /// The fatal error that stopped the invocation before every target ran.
    pub fn aborted(&self) -> Option<&PublishError> {
        self.results.iter().find_map(|r| match &r.outcome {
            TargetOutcome::Failed(err) if err.is_fatal() => Some(err),
            _ => None,
        })
    }

    /// Collapse into a `Result`: any failed target fails the invocation as a
    /// whole so the task facility can re-run it. A fatal error is returned
    /// as itself so it is not retried.
    pub fn into_result(self) -> Result<PublishReport, PublishError> {
        let failed = self.failed_targets();
        if failed.is_empty() {
            return Ok(self);
        }
        let fatal = self.results.into_iter().find_map(|r| match r.outcome {
            TargetOutcome::Failed(err) if err.is_fatal() => Some(err),
            _ => None,
        });
        Err(fatal.unwrap_or(PublishError::PartialFailure { failed }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
