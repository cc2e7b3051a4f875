//! Counting fakes for the publish pipeline.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use datapub_core::types::{SiblingConfig, TransferReceipt};
use datapub_core::{
    CreateRepository, Dataset, DatasetId, DatasetStore, HostedGitProvider, ObjectStorageProvider,
    ProviderError, PublishConfig, RegistrationGuard, RemoteDescriptor, Sibling, SiblingName,
    SnapshotTag, StoreError,
};
use datapub_publish::{Orchestrator, SiblingResolver};

pub fn config_with_credentials() -> PublishConfig {
    let mut config = PublishConfig::default();
    config.hosted_git.login = Some("openneuro-bot".into());
    config.hosted_git.token = Some("ghp_test".into());
    config.hosted_git.organization = Some("OpenNeuroDatasets".into());
    config
}

pub struct FakeDataset {
    pub id: DatasetId,
    pub tags: Vec<SnapshotTag>,
    pub siblings: Mutex<Vec<Sibling>>,
    pub creates: AtomicUsize,
    pub pushes: AtomicUsize,
    pub exports: AtomicUsize,
    pub fail_push: bool,
    pub fail_export: bool,
    /// Stretch the window between listing and creating siblings.
    pub list_delay: Option<Duration>,
}

impl FakeDataset {
    pub fn new(id: &str) -> Self {
        Self {
            id: DatasetId::from(id),
            tags: vec![SnapshotTag::from("v1")],
            siblings: Mutex::default(),
            creates: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
            exports: AtomicUsize::new(0),
            fail_push: false,
            fail_export: false,
            list_delay: None,
        }
    }

    fn receipt(&self, sibling: &Sibling, refs: Vec<SnapshotTag>) -> TransferReceipt {
        TransferReceipt {
            sibling: sibling.name.clone(),
            url: sibling.config.url.clone(),
            objects_written: 1,
            objects_unchanged: 0,
            refs,
        }
    }
}

impl Dataset for FakeDataset {
    fn id(&self) -> &DatasetId {
        &self.id
    }

    fn siblings(&self) -> Result<Vec<Sibling>, StoreError> {
        let current = self.siblings.lock().unwrap().clone();
        if let Some(delay) = self.list_delay {
            std::thread::sleep(delay);
        }
        Ok(current)
    }

    fn lock_registration(&self, _name: &str) -> Result<RegistrationGuard, StoreError> {
        Ok(Box::new(()))
    }

    fn create_sibling(&self, name: &str, config: SiblingConfig) -> Result<Sibling, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let sibling = Sibling {
            name: SiblingName::from(name),
            config,
        };
        self.siblings.lock().unwrap().push(sibling.clone());
        Ok(sibling)
    }

    fn push(&self, sibling: &Sibling) -> Result<TransferReceipt, StoreError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        if self.fail_push {
            return Err(StoreError::UnsupportedRemote(sibling.config.url.clone()));
        }
        Ok(self.receipt(sibling, self.tags.clone()))
    }

    fn export(&self, sibling: &Sibling, snapshot: &SnapshotTag) -> Result<TransferReceipt, StoreError> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        if self.fail_export {
            return Err(StoreError::Io {
                path: sibling.config.url.clone().into(),
                source: std::io::Error::other("connection reset"),
            });
        }
        Ok(self.receipt(sibling, vec![snapshot.clone()]))
    }
}

#[derive(Default)]
pub struct FakeGitHost {
    pub calls: AtomicUsize,
    pub reject: bool,
    /// Stretch the provider call so racing resolvers overlap.
    pub delay: Option<Duration>,
}

impl HostedGitProvider for FakeGitHost {
    fn create_repository(&self, request: &CreateRepository) -> Result<RemoteDescriptor, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.reject {
            return Err(ProviderError::Rejected {
                status: 500,
                message: "server error".into(),
            });
        }
        Ok(RemoteDescriptor {
            url: format!("git@github.com:{}/{}.git", request.organization, request.repo_name),
            access_protocol: Some(request.access_protocol),
        })
    }
}

#[derive(Default)]
pub struct FakeBuckets {
    pub calls: AtomicUsize,
    pub missing: bool,
}

impl ObjectStorageProvider for FakeBuckets {
    fn bind_bucket(&self, bucket: &str) -> Result<RemoteDescriptor, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.missing {
            return Err(ProviderError::MissingBucket(bucket.to_string()));
        }
        Ok(RemoteDescriptor {
            url: format!("s3://{bucket}"),
            access_protocol: None,
        })
    }
}

pub struct Harness {
    pub git: Arc<FakeGitHost>,
    pub buckets: Arc<FakeBuckets>,
    pub orchestrator: Orchestrator,
}

pub fn harness(config: &PublishConfig, git: FakeGitHost, buckets: FakeBuckets) -> Harness {
    let git = Arc::new(git);
    let buckets = Arc::new(buckets);
    let resolver = SiblingResolver::new(config, git.clone(), buckets.clone());
    Harness {
        git,
        buckets,
        orchestrator: Orchestrator::new(resolver),
    }
}

/// Store that counts lookups and serves one dataset.
pub struct FakeStore {
    pub lookups: AtomicUsize,
    pub dataset: Arc<FakeDataset>,
}

struct SharedDataset(Arc<FakeDataset>);

impl Dataset for SharedDataset {
    fn id(&self) -> &DatasetId {
        self.0.id()
    }
    fn siblings(&self) -> Result<Vec<Sibling>, StoreError> {
        self.0.siblings()
    }
    fn lock_registration(&self, name: &str) -> Result<RegistrationGuard, StoreError> {
        self.0.lock_registration(name)
    }
    fn create_sibling(&self, name: &str, config: SiblingConfig) -> Result<Sibling, StoreError> {
        self.0.create_sibling(name, config)
    }
    fn push(&self, sibling: &Sibling) -> Result<TransferReceipt, StoreError> {
        self.0.push(sibling)
    }
    fn export(&self, sibling: &Sibling, snapshot: &SnapshotTag) -> Result<TransferReceipt, StoreError> {
        self.0.export(sibling, snapshot)
    }
}

impl DatasetStore for FakeStore {
    fn get_dataset(&self, id: &DatasetId) -> Result<Box<dyn Dataset>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if id != self.dataset.id() {
            return Err(StoreError::DatasetNotFound(id.clone()));
        }
        Ok(Box::new(SharedDataset(self.dataset.clone())))
    }
}
