//! Target publisher: one transfer of a snapshot to a resolved sibling.
//!
//! Hosted-git targets receive a push of the full history; object-storage
//! targets receive an export of the snapshot tree only. Failures become
//! [`PublishError::Transfer`]; retrying is left to the caller.

use datapub_core::types::{TargetKind, TransferReceipt};
use datapub_core::{Dataset, PublishError, Sibling, SnapshotTag, TargetId};

pub fn publish(
    dataset: &dyn Dataset,
    target: TargetId,
    sibling: &Sibling,
    snapshot: &SnapshotTag,
) -> Result<TransferReceipt, PublishError> {
    let transfer_err = |message: String| PublishError::Transfer { target, message };

    match target.kind() {
        TargetKind::HostedGit => {
            let receipt = dataset.push(sibling).map_err(|e| transfer_err(e.to_string()))?;
            if !receipt.refs.contains(snapshot) {
                return Err(transfer_err(format!(
                    "snapshot {snapshot} is not among the refs pushed to {}",
                    sibling.config.url
                )));
            }
            Ok(receipt)
        }
        TargetKind::ObjectStorage(_) => dataset
            .export(sibling, snapshot)
            .map_err(|e| transfer_err(e.to_string())),
    }
}
