//! Remote provider traits: hosted-git repository creation and object-storage
//! bucket binding.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AccessProtocol;

/// Parameters for creating a hosted-git repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRepository {
    pub repo_name: String,
    pub login: String,
    pub token: String,
    pub organization: String,
    pub access_protocol: AccessProtocol,
}

/// Where a freshly provisioned remote can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    pub url: String,
    pub access_protocol: Option<AccessProtocol>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("bucket '{0}' does not exist")]
    MissingBucket(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Creates repositories on a git hosting service.
pub trait HostedGitProvider: Send + Sync {
    /// Create `request.repo_name` under `request.organization`. Creating a
    /// repository that already exists succeeds with the existing remote.
    fn create_repository(&self, request: &CreateRepository)
        -> Result<RemoteDescriptor, ProviderError>;
}

/// Binds datasets to pre-existing buckets.
pub trait ObjectStorageProvider: Send + Sync {
    /// Resolve `bucket` to a remote; never creates the bucket.
    fn bind_bucket(&self, bucket: &str) -> Result<RemoteDescriptor, ProviderError>;
}
