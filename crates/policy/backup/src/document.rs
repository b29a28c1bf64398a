//! Concrete backup over the engine's document store.

use crate::collection::CollectionBackup;
use crate::diff::{BackupEntry, CollectionDiff, DiffActionType};
use crate::{BackupError, BackupResult};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use policy_storage::{DocumentFilter, DocumentKind, DocumentRecord, DocumentStore};
use policy_types::PolicyId;
use serde_json::Value;
use std::sync::Arc;

/// Key the inlined body travels under inside a diff payload.
const FILE_KEY: &str = "file";

const MAX_FILE_RETRIES: u32 = 10;

/// Backup for one `(policy, document kind)` collection.
pub struct DocumentCollectionBackup {
    policy_id: PolicyId,
    kind: DocumentKind,
    store: Arc<dyn DocumentStore>,
}

impl DocumentCollectionBackup {
    pub fn new(policy_id: PolicyId, kind: DocumentKind, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            policy_id,
            kind,
            store,
        }
    }

    /// Hash over the metadata fields of a row.
    pub fn prop_hash(record: &DocumentRecord) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(record.owner.as_bytes());
        hasher.update(format!("{:?}", record.kind).as_bytes());
        hasher.update(&[record.deleted as u8]);
        hasher.finalize().to_hex().to_string()
    }

    /// Hash over the body of a row. The storage-file pointer participates:
    /// a re-uploaded body gets a new pointer and therefore a new hash.
    pub fn doc_hash(record: &DocumentRecord) -> String {
        let mut hasher = blake3::Hasher::new();
        let body = serde_json::to_vec(&record.document).unwrap_or_default();
        hasher.update(&body);
        if let Some(file_id) = &record.file_id {
            hasher.update(file_id.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Apply a diff produced by another replica to the local store.
    ///
    /// Idempotent: an action whose hashes already match the local row is
    /// skipped, so replaying a diff against an up-to-date replica changes
    /// nothing.
    pub async fn apply_diff(&self, diff: &CollectionDiff) -> BackupResult<()> {
        for action in &diff.actions {
            match action.action {
                DiffActionType::Insert | DiffActionType::Update => {
                    let existing = self.store.get(&self.policy_id, &action.id).await?;

                    if let Some(row) = &existing {
                        let current = BackupEntry {
                            row_id: row.id.clone(),
                            prop_hash: row.prop_hash.clone().unwrap_or_default(),
                            doc_hash: row.doc_hash.clone().unwrap_or_default(),
                            deleted: row.deleted,
                        };
                        let target = BackupEntry {
                            row_id: action.id.clone(),
                            prop_hash: action.prop_hash.clone(),
                            doc_hash: action.doc_hash.clone(),
                            deleted: false,
                        };
                        if !self.check_document(&target, &current) {
                            continue;
                        }
                    }

                    let payload = action.diff.as_ref().ok_or_else(|| {
                        BackupError::MalformedDiff(format!(
                            "{:?} action for {} carries no payload",
                            action.action, action.id
                        ))
                    })?;

                    let mut row = existing.unwrap_or_else(|| {
                        DocumentRecord::new(
                            self.policy_id.clone(),
                            "",
                            self.kind,
                            Value::Object(Default::default()),
                        )
                        .with_id(action.id.clone())
                    });

                    if let Some(owner) = payload.get("owner").and_then(Value::as_str) {
                        row.owner = owner.to_string();
                    }
                    if let Some(changes) = payload.get("document") {
                        self.merge_document(&mut row, changes).await?;
                    }
                    row.prop_hash = Some(action.prop_hash.clone());
                    row.doc_hash = Some(action.doc_hash.clone());
                    row.deleted = false;
                    self.store.save(row).await?;
                }
                DiffActionType::Delete => {
                    match self.store.get(&self.policy_id, &action.id).await? {
                        Some(row) if !row.deleted => {
                            self.store.delete(&self.policy_id, &action.id).await?;
                        }
                        // Already gone, or never seen: nothing to do
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Merge changed document fields into a row. The inlined body, if any,
    /// goes to local file storage rather than into the document itself.
    async fn merge_document(&self, row: &mut DocumentRecord, changes: &Value) -> BackupResult<()> {
        let Some(changes) = changes.as_object() else {
            row.document = changes.clone();
            return Ok(());
        };

        for (key, value) in changes {
            if key == FILE_KEY {
                let encoded = value.as_str().ok_or_else(|| {
                    BackupError::MalformedDiff(format!("inlined body for {} is not a string", row.id))
                })?;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| BackupError::MalformedDiff(e.to_string()))?;
                let file_id = self.store.save_file(bytes).await?;
                row.file_id = Some(file_id);
                continue;
            }
            match row.document.as_object_mut() {
                Some(map) => {
                    map.insert(key.clone(), value.clone());
                }
                None => {
                    row.document =
                        Value::Object([(key.clone(), value.clone())].into_iter().collect());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CollectionBackup for DocumentCollectionBackup {
    type Doc = DocumentRecord;

    fn row_id(&self, row: &DocumentRecord) -> String {
        row.id.clone()
    }

    async fn find_documents(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> BackupResult<Vec<DocumentRecord>> {
        let mut filter = DocumentFilter::for_policy(self.policy_id.clone()).kind(self.kind);
        if let Some(since) = since {
            filter = filter.updated_since(since);
        }
        Ok(self.store.find(filter).await?)
    }

    async fn find_deleted_documents(&self) -> BackupResult<Vec<DocumentRecord>> {
        let rows = self
            .store
            .find(
                DocumentFilter::for_policy(self.policy_id.clone())
                    .kind(self.kind)
                    .include_deleted(),
            )
            .await?;
        Ok(rows.into_iter().filter(|row| row.deleted).collect())
    }

    fn create_backup_data(&self, row: &DocumentRecord) -> BackupEntry {
        BackupEntry {
            row_id: row.id.clone(),
            prop_hash: Self::prop_hash(row),
            doc_hash: Self::doc_hash(row),
            deleted: row.deleted,
        }
    }

    fn create_diff_data(
        &self,
        new_row: &DocumentRecord,
        old_row: Option<&DocumentRecord>,
    ) -> Value {
        let mut payload = serde_json::Map::new();

        match old_row {
            None => {
                payload.insert("owner".to_string(), Value::String(new_row.owner.clone()));
                payload.insert(
                    "kind".to_string(),
                    serde_json::to_value(new_row.kind).unwrap_or(Value::Null),
                );
                payload.insert("document".to_string(), new_row.document.clone());
            }
            Some(old) => {
                if old.owner != new_row.owner {
                    payload.insert("owner".to_string(), Value::String(new_row.owner.clone()));
                }
                let changes = match (new_row.document.as_object(), old.document.as_object()) {
                    (Some(new_map), Some(old_map)) => {
                        let mut changed = serde_json::Map::new();
                        for (key, value) in new_map {
                            if old_map.get(key) != Some(value) {
                                changed.insert(key.clone(), value.clone());
                            }
                        }
                        Value::Object(changed)
                    }
                    _ => new_row.document.clone(),
                };
                payload.insert("document".to_string(), changes);
            }
        }

        Value::Object(payload)
    }

    async fn load_file(&self, row: DocumentRecord, retry: u32) -> DocumentRecord {
        let mut current = row;
        let mut attempt = retry;

        loop {
            let Some(file_id) = current.file_id.clone() else {
                return current;
            };
            match self.store.load_file(&file_id).await {
                Ok(bytes) => {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                    if let Some(map) = current.document.as_object_mut() {
                        map.insert(FILE_KEY.to_string(), Value::String(encoded));
                    } else {
                        current.document = Value::Object(
                            [(FILE_KEY.to_string(), Value::String(encoded))]
                                .into_iter()
                                .collect(),
                        );
                    }
                    return current;
                }
                Err(err) => {
                    if attempt >= MAX_FILE_RETRIES {
                        tracing::warn!(
                            row_id = %current.id,
                            %err,
                            "Giving up on file body; sending row without it"
                        );
                        return current;
                    }
                    attempt += 1;
                    // The pointer may have moved; re-query the row before retrying
                    if let Ok(Some(fresh)) = self.store.get(&self.policy_id, &current.id).await {
                        current = fresh;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_storage::InMemoryPolicyStorage;
    use serde_json::json;

    fn make_backup(store: &Arc<InMemoryPolicyStorage>) -> DocumentCollectionBackup {
        DocumentCollectionBackup::new(
            PolicyId::new("p-1"),
            DocumentKind::Credential,
            store.clone() as Arc<dyn DocumentStore>,
        )
    }

    async fn seed_row(store: &Arc<InMemoryPolicyStorage>, id: &str, field: i64) -> DocumentRecord {
        store
            .save(
                DocumentRecord::new(
                    PolicyId::new("p-1"),
                    "did:aegis:alice",
                    DocumentKind::Credential,
                    json!({"field": field, "stable": true}),
                )
                .with_id(id),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_backup_then_replicate() {
        let source = Arc::new(InMemoryPolicyStorage::new());
        seed_row(&source, "a", 1).await;
        seed_row(&source, "b", 2).await;

        let backup = make_backup(&source);
        let (snapshot, diff) = backup.create_collection_backup().await.unwrap();
        assert_eq!(diff.actions.len(), 2);
        assert!(diff.full);
        assert_eq!(snapshot.rows.len(), 2);

        let replica_store = Arc::new(InMemoryPolicyStorage::new());
        let replica = make_backup(&replica_store);
        replica.apply_diff(&diff).await.unwrap();

        let row = replica_store
            .get(&PolicyId::new("p-1"), "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.document["field"], json!(1));
        assert_eq!(row.doc_hash.as_deref(), Some(diff.actions[0].doc_hash.as_str()));
    }

    #[tokio::test]
    async fn incremental_diff_carries_only_changed_fields() {
        let source = Arc::new(InMemoryPolicyStorage::new());
        seed_row(&source, "a", 1).await;

        let backup = make_backup(&source);
        let (snapshot, _) = backup.create_collection_backup().await.unwrap();

        let mut row = source.get(&PolicyId::new("p-1"), "a").await.unwrap().unwrap();
        row.document["field"] = json!(42);
        source.save(row).await.unwrap();

        let (_, diff) = backup.create_collection_diff(&snapshot).await.unwrap();
        assert_eq!(diff.actions.len(), 1);
        assert_eq!(diff.actions[0].action, DiffActionType::Update);

        let changes = diff.actions[0].diff.as_ref().unwrap();
        assert_eq!(changes["document"]["field"], json!(42));
        // Unchanged fields stay out of the payload
        assert!(changes["document"].get("stable").is_none());
    }

    #[tokio::test]
    async fn unchanged_collection_produces_empty_diff() {
        let source = Arc::new(InMemoryPolicyStorage::new());
        seed_row(&source, "a", 1).await;

        let backup = make_backup(&source);
        let (snapshot, first) = backup.create_collection_backup().await.unwrap();
        let (_, second) = backup.create_collection_diff(&snapshot).await.unwrap();

        assert!(second.actions.is_empty());
        // An empty diff folds nothing: the running hash carries over
        assert_eq!(second.hash, first.hash);
    }

    #[tokio::test]
    async fn applying_the_same_diff_twice_changes_nothing() {
        let source = Arc::new(InMemoryPolicyStorage::new());
        seed_row(&source, "a", 1).await;
        let backup = make_backup(&source);
        let (_, diff) = backup.create_collection_backup().await.unwrap();

        let replica_store = Arc::new(InMemoryPolicyStorage::new());
        let replica = make_backup(&replica_store);
        replica.apply_diff(&diff).await.unwrap();

        let after_first = replica_store
            .get(&PolicyId::new("p-1"), "a")
            .await
            .unwrap()
            .unwrap();

        // The replica already matches: check_document is false for the action
        let current = replica.create_backup_data(&after_first);
        let target = BackupEntry {
            row_id: "a".into(),
            prop_hash: diff.actions[0].prop_hash.clone(),
            doc_hash: diff.actions[0].doc_hash.clone(),
            deleted: false,
        };
        let current = BackupEntry {
            row_id: current.row_id,
            prop_hash: after_first.prop_hash.clone().unwrap(),
            doc_hash: after_first.doc_hash.clone().unwrap(),
            deleted: after_first.deleted,
        };
        assert!(!replica.check_document(&target, &current));

        replica.apply_diff(&diff).await.unwrap();
        let after_second = replica_store
            .get(&PolicyId::new("p-1"), "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after_second.updated_at, after_first.updated_at);
    }

    #[tokio::test]
    async fn deletes_flow_through_as_tombstones() {
        let source = Arc::new(InMemoryPolicyStorage::new());
        seed_row(&source, "a", 1).await;
        seed_row(&source, "b", 2).await;

        let backup = make_backup(&source);
        let (snapshot, full) = backup.create_collection_backup().await.unwrap();

        let replica_store = Arc::new(InMemoryPolicyStorage::new());
        let replica = make_backup(&replica_store);
        replica.apply_diff(&full).await.unwrap();

        source.delete(&PolicyId::new("p-1"), "a").await.unwrap();
        let (_, diff) = backup.create_collection_diff(&snapshot).await.unwrap();
        assert_eq!(diff.actions.len(), 1);
        assert_eq!(diff.actions[0].action, DiffActionType::Delete);

        replica.apply_diff(&diff).await.unwrap();
        let row = replica_store
            .get(&PolicyId::new("p-1"), "a")
            .await
            .unwrap()
            .unwrap();
        assert!(row.deleted);

        // Replaying the delete is a no-op
        replica.apply_diff(&diff).await.unwrap();
    }

    #[tokio::test]
    async fn file_bodies_travel_only_when_doc_hash_changed() {
        let source = Arc::new(InMemoryPolicyStorage::new());
        let file_id = source.save_file(b"big body".to_vec()).await.unwrap();
        source
            .save(
                DocumentRecord::new(
                    PolicyId::new("p-1"),
                    "did:aegis:alice",
                    DocumentKind::Credential,
                    json!({"field": 1}),
                )
                .with_id("a")
                .with_file_id(file_id),
            )
            .await
            .unwrap();

        let backup = make_backup(&source);
        let (snapshot, full) = backup.create_collection_backup().await.unwrap();

        // The full backup inlines the body
        let payload = full.actions[0].diff.as_ref().unwrap();
        let encoded = payload["document"][FILE_KEY].as_str().unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(bytes, b"big body");

        // Metadata-only change: no body in the next diff
        let mut row = source.get(&PolicyId::new("p-1"), "a").await.unwrap().unwrap();
        row.owner = "did:aegis:bob".to_string();
        source.save(row).await.unwrap();

        let (_, diff) = backup.create_collection_diff(&snapshot).await.unwrap();
        assert_eq!(diff.actions.len(), 1);
        let payload = diff.actions[0].diff.as_ref().unwrap();
        assert_eq!(payload["owner"], json!("did:aegis:bob"));
        assert!(payload["document"].get(FILE_KEY).is_none());
    }

    #[tokio::test]
    async fn replica_rehomes_inlined_bodies_into_local_files() {
        let source = Arc::new(InMemoryPolicyStorage::new());
        let file_id = source.save_file(b"payload".to_vec()).await.unwrap();
        source
            .save(
                DocumentRecord::new(
                    PolicyId::new("p-1"),
                    "did:aegis:alice",
                    DocumentKind::Credential,
                    json!({}),
                )
                .with_id("a")
                .with_file_id(file_id),
            )
            .await
            .unwrap();

        let backup = make_backup(&source);
        let (_, full) = backup.create_collection_backup().await.unwrap();

        let replica_store = Arc::new(InMemoryPolicyStorage::new());
        let replica = make_backup(&replica_store);
        replica.apply_diff(&full).await.unwrap();

        let row = replica_store
            .get(&PolicyId::new("p-1"), "a")
            .await
            .unwrap()
            .unwrap();
        let local_file = row.file_id.expect("body should be rehomed");
        let bytes = replica_store.load_file(&local_file).await.unwrap();
        assert_eq!(bytes, b"payload");
        // The raw base64 never lands in the replica's document
        assert!(row.document.get(FILE_KEY).is_none());
    }

    #[tokio::test]
    async fn missing_file_gives_up_after_retries() {
        let source = Arc::new(InMemoryPolicyStorage::new());
        source
            .save(
                DocumentRecord::new(
                    PolicyId::new("p-1"),
                    "did:aegis:alice",
                    DocumentKind::Credential,
                    json!({"field": 1}),
                )
                .with_id("a")
                .with_file_id("dangling-pointer"),
            )
            .await
            .unwrap();

        let backup = make_backup(&source);
        let row = source.get(&PolicyId::new("p-1"), "a").await.unwrap().unwrap();
        let loaded = backup.load_file(row, 0).await;
        assert!(loaded.document.get(FILE_KEY).is_none());
    }
}
