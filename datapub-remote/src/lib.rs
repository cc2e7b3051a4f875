//! # datapub-remote
//!
//! Remote providers that provision siblings:
//! - [`GithubProvider`] creates repositories through the GitHub REST API.
//! - [`LocalGitHost`] creates repositories as directories, reached over `file://`.
//! - [`LocalBucketProvider`] binds pre-existing bucket directories.

pub mod github;
pub mod local;

use std::sync::Arc;

use datapub_core::{HostedGitProvider, HostedGitProviderKind, ObjectStorageProvider, PublishConfig};

pub use github::GithubProvider;
pub use local::{LocalBucketProvider, LocalGitHost};

/// The provider pair a sibling resolver is built with.
#[derive(Clone)]
pub struct Providers {
    pub hosted_git: Arc<dyn HostedGitProvider>,
    pub object_storage: Arc<dyn ObjectStorageProvider>,
}

/// Build the providers selected by `config`.
pub fn providers_from_config(config: &PublishConfig) -> Providers {
    let hosted_git: Arc<dyn HostedGitProvider> = match config.hosted_git.provider {
        HostedGitProviderKind::Github => Arc::new(GithubProvider::from_config(&config.hosted_git)),
        HostedGitProviderKind::Local => Arc::new(LocalGitHost::new(&config.hosted_git.local_root)),
    };
    Providers {
        hosted_git,
        object_storage: Arc::new(LocalBucketProvider::new(&config.object_storage.root)),
    }
}
