//! Publish orchestration: realm policy, then resolve and transfer per target.
//!
//! Targets run sequentially in realm-policy order. A provisioning or transfer
//! failure is recorded against its target and the next target still runs. A
//! configuration error is recorded too but aborts the invocation: no later
//! target runs, and [`PublishReport::into_result`] returns that error.

use datapub_core::types::{TargetOutcome, TargetResult, TargetState};
use datapub_core::{
    targets_for, Dataset, DatasetId, DatasetStore, PublishError, PublishReport, Realm,
    SnapshotTag, TargetId,
};

use crate::publisher;
use crate::resolver::SiblingResolver;

/// Forward-only state of one target within an invocation.
struct TargetProgress<'a> {
    dataset: &'a DatasetId,
    target: TargetId,
    state: TargetState,
}

impl<'a> TargetProgress<'a> {
    fn new(dataset: &'a DatasetId, target: TargetId) -> Self {
        Self {
            dataset,
            target,
            state: TargetState::Pending,
        }
    }

    fn advance(&mut self, next: TargetState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(dataset = %self.dataset, target = %self.target, state = ?next, "target state");
        self.state = next;
    }
}

/// Runs publish invocations. Holds the resolver and nothing per invocation.
pub struct Orchestrator {
    resolver: SiblingResolver,
}

impl Orchestrator {
    pub fn new(resolver: SiblingResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &SiblingResolver {
        &self.resolver
    }

    /// Publish `snapshot` of `dataset` to every target `realm` requires.
    ///
    /// Returns the outcomes of the targets that ran, including the one that
    /// aborted the invocation; use [`PublishReport::into_result`] to fail the
    /// invocation when any target failed.
    pub fn publish_snapshot(
        &self,
        dataset: &dyn Dataset,
        snapshot: &SnapshotTag,
        realm: Realm,
    ) -> Result<PublishReport, PublishError> {
        snapshot.validate()?;
        let targets = targets_for(realm);
        tracing::info!(dataset = %dataset.id(), %snapshot, %realm, targets = targets.len(), "publishing snapshot");

        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let mut aborted = false;
            let outcome = match self.publish_target(dataset, target, snapshot) {
                Ok(receipt) => {
                    tracing::info!(
                        dataset = %dataset.id(),
                        %target,
                        written = receipt.objects_written,
                        unchanged = receipt.objects_unchanged,
                        "target published"
                    );
                    TargetOutcome::Succeeded(receipt)
                }
                Err(err) if err.is_fatal() => {
                    tracing::error!(dataset = %dataset.id(), %target, error = %err, "aborting publish");
                    aborted = true;
                    TargetOutcome::Failed(err)
                }
                Err(err) => {
                    tracing::warn!(dataset = %dataset.id(), %target, error = %err, "target failed; continuing");
                    TargetOutcome::Failed(err)
                }
            };
            results.push(TargetResult { target, outcome });
            if aborted {
                break;
            }
        }

        Ok(PublishReport {
            dataset: dataset.id().clone(),
            snapshot: snapshot.clone(),
            realm,
            results,
        })
    }

    fn publish_target(
        &self,
        dataset: &dyn Dataset,
        target: TargetId,
        snapshot: &SnapshotTag,
    ) -> Result<datapub_core::TransferReceipt, PublishError> {
        let mut progress = TargetProgress::new(dataset.id(), target);

        progress.advance(TargetState::ResolvingSibling);
        let sibling = match self.resolver.resolve(dataset, target) {
            Ok(sibling) => sibling,
            Err(err) => {
                progress.advance(TargetState::Failed);
                return Err(err);
            }
        };

        progress.advance(TargetState::Transferring);
        let result = publisher::publish(dataset, target, &sibling, snapshot);
        progress.advance(if result.is_ok() {
            TargetState::Succeeded
        } else {
            TargetState::Failed
        });
        result
    }
}

/// Publish `snapshot` of `dataset_id` from `store` to the targets of `realm`.
///
/// The realm, dataset id and snapshot tag are checked before the store is
/// touched, so bad input fails with [`PublishError::InvalidRealm`] or
/// [`PublishError::InvalidName`] and no I/O.
pub fn publish_snapshot(
    orchestrator: &Orchestrator,
    store: &dyn DatasetStore,
    dataset_id: &DatasetId,
    snapshot: &SnapshotTag,
    realm: &str,
) -> Result<PublishReport, PublishError> {
    let realm: Realm = realm.parse()?;
    dataset_id.validate()?;
    snapshot.validate()?;
    let dataset = store
        .get_dataset(dataset_id)
        .map_err(|source| PublishError::Dataset {
            dataset: dataset_id.clone(),
            source,
        })?;
    orchestrator.publish_snapshot(dataset.as_ref(), snapshot, realm)
}
