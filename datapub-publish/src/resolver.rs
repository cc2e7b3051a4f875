//! Sibling resolution: return the registered sibling for a target, or
//! provision the remote and register one.
//!
//! The check-then-create sequence runs under a lock keyed by
//! `(dataset, target)` and under the dataset's registration lock for the
//! sibling name, so concurrent first-time publishes for the same pair create
//! exactly one remote, whether they run in one process or several.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use datapub_core::types::{RemoteKind, SiblingConfig, TargetKind};
use datapub_core::{
    CreateRepository, Dataset, DatasetId, HostedGitConfig, HostedGitProvider,
    ObjectStorageConfig, ObjectStorageProvider, PublishConfig, PublishError, Realm, Sibling,
    TargetId,
};

type LockKey = (DatasetId, TargetId);

#[derive(Default)]
struct SiblingLocks {
    inner: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl SiblingLocks {
    fn lock_for(&self, dataset: &DatasetId, target: TargetId) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry((dataset.clone(), target))
            .or_default()
            .clone()
    }

    /// Run `f` holding the lock for `(dataset, target)`. The map entry is
    /// removed once nobody holds or waits on it.
    fn with_lock<T>(&self, dataset: &DatasetId, target: TargetId, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(dataset, target);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // Clones are only taken under the map mutex, so a count of one here
        // means the map holds the last reference.
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        let key = (dataset.clone(), target);
        if locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&key);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Resolves siblings with an explicit configuration and injected providers.
pub struct SiblingResolver {
    hosted_git: HostedGitConfig,
    object_storage: ObjectStorageConfig,
    git_provider: Arc<dyn HostedGitProvider>,
    storage_provider: Arc<dyn ObjectStorageProvider>,
    locks: SiblingLocks,
}

impl SiblingResolver {
    pub fn new(
        config: &PublishConfig,
        git_provider: Arc<dyn HostedGitProvider>,
        storage_provider: Arc<dyn ObjectStorageProvider>,
    ) -> Self {
        Self {
            hosted_git: config.hosted_git.clone(),
            object_storage: config.object_storage.clone(),
            git_provider,
            storage_provider,
            locks: SiblingLocks::default(),
        }
    }

    /// The sibling registered for `target`, provisioning it on first use.
    ///
    /// An existing registration is returned unchanged and no provider is
    /// contacted.
    pub fn resolve(&self, dataset: &dyn Dataset, target: TargetId) -> Result<Sibling, PublishError> {
        self.locks
            .with_lock(dataset.id(), target, || self.resolve_locked(dataset, target))
    }

    fn resolve_locked(&self, dataset: &dyn Dataset, target: TargetId) -> Result<Sibling, PublishError> {
        let name = target.sibling_name();
        let _registration = dataset
            .lock_registration(name)
            .map_err(|e| provisioning(target, e))?;

        let existing = dataset
            .siblings()
            .map_err(|e| provisioning(target, e))?
            .into_iter()
            .find(|s| s.name.0 == name);
        if let Some(sibling) = existing {
            tracing::debug!(dataset = %dataset.id(), %target, "sibling already registered");
            return Ok(sibling);
        }

        let config = match target.kind() {
            TargetKind::HostedGit => self.provision_repository(dataset.id())?,
            TargetKind::ObjectStorage(realm) => self.provision_bucket(target, realm)?,
        };
        let sibling = dataset
            .create_sibling(name, config)
            .map_err(|e| provisioning(target, e))?;
        tracing::info!(dataset = %dataset.id(), %target, url = %sibling.config.url, "created sibling");
        Ok(sibling)
    }

    fn provision_repository(&self, dataset: &DatasetId) -> Result<SiblingConfig, PublishError> {
        let credentials = self.hosted_git.credentials()?;
        let request = CreateRepository {
            repo_name: dataset.0.clone(),
            login: credentials.login,
            token: credentials.token,
            organization: credentials.organization,
            access_protocol: self.hosted_git.access_protocol,
        };
        let remote = self
            .git_provider
            .create_repository(&request)
            .map_err(|e| provisioning(TargetId::HostedGit, e))?;
        Ok(SiblingConfig {
            kind: RemoteKind::Git,
            url: remote.url,
            access_protocol: remote.access_protocol.or(Some(request.access_protocol)),
            bucket: None,
        })
    }

    fn provision_bucket(&self, target: TargetId, realm: Realm) -> Result<SiblingConfig, PublishError> {
        let bucket = self.object_storage.bucket_for(realm);
        let remote = self
            .storage_provider
            .bind_bucket(bucket)
            .map_err(|e| provisioning(target, e))?;
        Ok(SiblingConfig {
            kind: RemoteKind::SpecialRemote,
            url: remote.url,
            access_protocol: remote.access_protocol,
            bucket: Some(bucket.to_string()),
        })
    }
}

fn provisioning(target: TargetId, err: impl std::fmt::Display) -> PublishError {
    PublishError::Provisioning {
        target,
        message: err.to_string(),
    }
}
