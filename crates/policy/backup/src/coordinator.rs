//! Per-policy backup orchestration across all backed-up collections.

use crate::collection::CollectionBackup;
use crate::diff::{CollectionDiff, CollectionSnapshot};
use crate::document::DocumentCollectionBackup;
use crate::BackupResult;
use chrono::{DateTime, Utc};
use policy_storage::{DocumentKind, DocumentRecord, DocumentStore};
use policy_types::PolicyId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The collections a policy snapshots.
const BACKED_UP_KINDS: [DocumentKind; 4] = [
    DocumentKind::Credential,
    DocumentKind::Did,
    DocumentKind::State,
    DocumentKind::Role,
];

/// One combined backup emission for a policy: a diff per collection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyDiff {
    pub uuid: String,
    pub full: bool,
    pub index: u32,
    pub last_update: DateTime<Utc>,
    /// Keyed by collection name (document kind)
    pub collections: BTreeMap<String, CollectionDiff>,
}

/// Drives the full-then-incremental backup cycle for one policy.
///
/// The first emission is always a full backup; subsequent calls diff against
/// the retained snapshots. `create(true)` forces a new full backup and resets
/// the chain.
pub struct BackupCoordinator {
    policy_id: PolicyId,
    collections: Vec<(DocumentKind, DocumentCollectionBackup)>,
    snapshots: BTreeMap<String, CollectionSnapshot<DocumentRecord>>,
    index: u32,
}

impl BackupCoordinator {
    pub fn new(policy_id: PolicyId, store: Arc<dyn DocumentStore>) -> Self {
        let collections = BACKED_UP_KINDS
            .iter()
            .map(|kind| {
                (
                    *kind,
                    DocumentCollectionBackup::new(policy_id.clone(), *kind, store.clone()),
                )
            })
            .collect();
        Self {
            policy_id,
            collections,
            snapshots: BTreeMap::new(),
            index: 0,
        }
    }

    pub fn policy_id(&self) -> &PolicyId {
        &self.policy_id
    }

    /// Emit the next backup. Incremental when a snapshot chain exists and
    /// `full` is not forced.
    pub async fn create(&mut self, full: bool) -> BackupResult<PolicyDiff> {
        let full = full || self.snapshots.is_empty();
        let last_update = Utc::now();
        let mut collections = BTreeMap::new();

        for (kind, backup) in &self.collections {
            let name = format!("{kind:?}");
            let (snapshot, diff) = if full {
                backup.create_collection_backup().await?
            } else {
                let old = self.snapshots.entry(name.clone()).or_default();
                backup.create_collection_diff(old).await?
            };
            self.snapshots.insert(name.clone(), snapshot);
            collections.insert(name, diff);
        }

        if full {
            self.index = 0;
        } else {
            self.index += 1;
        }

        tracing::info!(
            policy_id = %self.policy_id,
            index = self.index,
            full,
            "Policy backup created"
        );

        Ok(PolicyDiff {
            uuid: uuid::Uuid::new_v4().to_string(),
            full,
            index: self.index,
            last_update,
            collections,
        })
    }

    /// Apply a policy diff to the local store (replica side).
    pub async fn apply(&self, diff: &PolicyDiff) -> BackupResult<()> {
        for (kind, backup) in &self.collections {
            if let Some(collection_diff) = diff.collections.get(&format!("{kind:?}")) {
                backup.apply_diff(collection_diff).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_storage::InMemoryPolicyStorage;
    use serde_json::json;

    async fn seed(store: &Arc<InMemoryPolicyStorage>, id: &str, kind: DocumentKind) {
        store
            .save(
                DocumentRecord::new(PolicyId::new("p-1"), "did:aegis:alice", kind, json!({"id": id}))
                    .with_id(id),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_emission_is_full_then_incremental() {
        let store = Arc::new(InMemoryPolicyStorage::new());
        seed(&store, "cred-1", DocumentKind::Credential).await;
        seed(&store, "role-1", DocumentKind::Role).await;

        let mut coordinator =
            BackupCoordinator::new(PolicyId::new("p-1"), store.clone() as Arc<dyn DocumentStore>);

        let first = coordinator.create(false).await.unwrap();
        assert!(first.full);
        assert_eq!(first.index, 0);
        assert_eq!(first.collections["Credential"].actions.len(), 1);
        assert_eq!(first.collections["Role"].actions.len(), 1);

        seed(&store, "cred-2", DocumentKind::Credential).await;
        let second = coordinator.create(false).await.unwrap();
        assert!(!second.full);
        assert_eq!(second.index, 1);
        assert_eq!(second.collections["Credential"].actions.len(), 1);
        assert!(second.collections["Role"].actions.is_empty());
    }

    #[tokio::test]
    async fn replica_converges_over_a_diff_chain() {
        let store = Arc::new(InMemoryPolicyStorage::new());
        seed(&store, "cred-1", DocumentKind::Credential).await;

        let mut source =
            BackupCoordinator::new(PolicyId::new("p-1"), store.clone() as Arc<dyn DocumentStore>);
        let full = source.create(false).await.unwrap();

        seed(&store, "cred-2", DocumentKind::Credential).await;
        let incremental = source.create(false).await.unwrap();

        let replica_store = Arc::new(InMemoryPolicyStorage::new());
        let replica = BackupCoordinator::new(
            PolicyId::new("p-1"),
            replica_store.clone() as Arc<dyn DocumentStore>,
        );
        replica.apply(&full).await.unwrap();
        replica.apply(&incremental).await.unwrap();

        assert!(replica_store
            .get(&PolicyId::new("p-1"), "cred-1")
            .await
            .unwrap()
            .is_some());
        assert!(replica_store
            .get(&PolicyId::new("p-1"), "cred-2")
            .await
            .unwrap()
            .is_some());
    }
}
