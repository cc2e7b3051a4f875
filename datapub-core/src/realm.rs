//! Realm policy: which targets a publish must reach.

use crate::types::{Realm, TargetId};

/// Ordered targets required for `realm`.
///
/// Object storage always comes first; the hosted-git repository is created
/// only after the export sibling is settled.
pub fn targets_for(realm: Realm) -> Vec<TargetId> {
    let mut targets = vec![realm.object_storage_target()];
    if realm.requires_hosted_git() {
        targets.push(TargetId::HostedGit);
    }
    targets
}
