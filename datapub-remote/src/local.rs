//! Directory-backed providers.
//!
//! Repositories and buckets are plain directories; siblings reach them through
//! `file://` URLs that `datapub-store` transfers understand.

use std::path::{Path, PathBuf};

use datapub_core::{
    CreateRepository, HostedGitProvider, ObjectStorageProvider, ProviderError, RemoteDescriptor,
};

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Git host that creates `<root>/<org>/<repo>.git`.
#[derive(Debug, Clone)]
pub struct LocalGitHost {
    root: PathBuf,
}

impl LocalGitHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn repository_dir(&self, organization: &str, repo_name: &str) -> PathBuf {
        self.root
            .join(organization)
            .join(format!("{repo_name}.git"))
    }
}

impl HostedGitProvider for LocalGitHost {
    fn create_repository(
        &self,
        request: &CreateRepository,
    ) -> Result<RemoteDescriptor, ProviderError> {
        let dir = self.repository_dir(&request.organization, &request.repo_name);
        let existed = dir.is_dir();
        std::fs::create_dir_all(&dir)?;
        if existed {
            tracing::debug!(path = %dir.display(), "local repository already exists");
        } else {
            tracing::info!(path = %dir.display(), "created local repository");
        }
        Ok(RemoteDescriptor {
            url: file_url(&dir),
            access_protocol: Some(request.access_protocol),
        })
    }
}

/// Buckets are existing subdirectories of `root`.
#[derive(Debug, Clone)]
pub struct LocalBucketProvider {
    root: PathBuf,
}

impl LocalBucketProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the bucket directory. Provisioning buckets is an operator task;
    /// `bind_bucket` never does this.
    pub fn create_bucket(&self, bucket: &str) -> Result<PathBuf, ProviderError> {
        let dir = self.root.join(bucket);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl ObjectStorageProvider for LocalBucketProvider {
    fn bind_bucket(&self, bucket: &str) -> Result<RemoteDescriptor, ProviderError> {
        let dir = self.root.join(bucket);
        if !dir.is_dir() {
            return Err(ProviderError::MissingBucket(bucket.to_string()));
        }
        Ok(RemoteDescriptor {
            url: file_url(&dir),
            access_protocol: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datapub_core::types::AccessProtocol;
    use tempfile::TempDir;

    fn request() -> CreateRepository {
        CreateRepository {
            repo_name: "ds1".into(),
            login: "bot".into(),
            token: "t".into(),
            organization: "org".into(),
            access_protocol: AccessProtocol::Ssh,
        }
    }

    #[test]
    fn local_repository_creation_is_idempotent() {
        let root = TempDir::new().unwrap();
        let host = LocalGitHost::new(root.path());
        let first = host.create_repository(&request()).unwrap();
        let second = host.create_repository(&request()).unwrap();
        assert_eq!(first, second);
        assert!(root.path().join("org/ds1.git").is_dir());
        assert_eq!(
            first.url,
            format!("file://{}", root.path().join("org/ds1.git").display())
        );
    }

    #[test]
    fn missing_bucket_is_not_created() {
        let root = TempDir::new().unwrap();
        let provider = LocalBucketProvider::new(root.path());
        let err = provider.bind_bucket("public").unwrap_err();
        assert!(matches!(err, ProviderError::MissingBucket(b) if b == "public"));
        assert!(!root.path().join("public").exists());
    }

    #[test]
    fn existing_bucket_binds_to_file_url() {
        let root = TempDir::new().unwrap();
        let provider = LocalBucketProvider::new(root.path());
        let dir = provider.create_bucket("public").unwrap();
        let descriptor = provider.bind_bucket("public").unwrap();
        assert_eq!(descriptor.url, format!("file://{}", dir.display()));
        assert_eq!(descriptor.access_protocol, None);
    }
}
