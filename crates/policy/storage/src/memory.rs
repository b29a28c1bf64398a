//! In-memory reference implementation of the storage contracts.
//!
//! Deterministic and test-friendly. Production deployments plug the entity
//! layer's transactional backend in behind the same traits.

use crate::model::{
    BlobRef, BlockCacheEntry, CacheValue, DocumentFilter, DocumentRecord,
};
use crate::traits::{BlobStore, BlockCacheStore, DocumentStore};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use policy_types::{BlockId, PolicyId};
use std::collections::HashMap;
use std::sync::RwLock;

/// Serialized size above which a cache value is spilled to the blob store.
pub const SPILL_THRESHOLD_BYTES: usize = 1024;

type CacheKey = (PolicyId, BlockId, String, String);

/// In-memory policy storage adapter.
#[derive(Default)]
pub struct InMemoryPolicyStorage {
    documents: RwLock<HashMap<(PolicyId, String), DocumentRecord>>,
    files: RwLock<HashMap<String, Vec<u8>>>,
    cache: RwLock<HashMap<CacheKey, BlockCacheEntry>>,
    blobs: RwLock<HashMap<BlobRef, Vec<u8>>>,
}

impl InMemoryPolicyStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryPolicyStorage {
    async fn find(&self, filter: DocumentFilter) -> StorageResult<Vec<DocumentRecord>> {
        let guard = self
            .documents
            .read()
            .map_err(|_| StorageError::Backend("documents lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        Ok(values)
    }

    async fn get(&self, policy_id: &PolicyId, id: &str) -> StorageResult<Option<DocumentRecord>> {
        let guard = self
            .documents
            .read()
            .map_err(|_| StorageError::Backend("documents lock poisoned".to_string()))?;
        Ok(guard.get(&(policy_id.clone(), id.to_string())).cloned())
    }

    async fn save(&self, mut record: DocumentRecord) -> StorageResult<DocumentRecord> {
        let mut guard = self
            .documents
            .write()
            .map_err(|_| StorageError::Backend("documents lock poisoned".to_string()))?;
        record.updated_at = Utc::now();
        guard.insert((record.policy_id.clone(), record.id.clone()), record.clone());
        Ok(record)
    }

    async fn delete(&self, policy_id: &PolicyId, id: &str) -> StorageResult<()> {
        let mut guard = self
            .documents
            .write()
            .map_err(|_| StorageError::Backend("documents lock poisoned".to_string()))?;
        let record = guard
            .get_mut(&(policy_id.clone(), id.to_string()))
            .ok_or_else(|| StorageError::NotFound(format!("document {id} not found")))?;
        record.deleted = true;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn save_file(&self, bytes: Vec<u8>) -> StorageResult<String> {
        let mut guard = self
            .files
            .write()
            .map_err(|_| StorageError::Backend("files lock poisoned".to_string()))?;
        let file_id = uuid::Uuid::new_v4().to_string();
        guard.insert(file_id.clone(), bytes);
        Ok(file_id)
    }

    async fn load_file(&self, file_id: &str) -> StorageResult<Vec<u8>> {
        let guard = self
            .files
            .read()
            .map_err(|_| StorageError::Backend("files lock poisoned".to_string()))?;
        guard
            .get(file_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("file {file_id} not found")))
    }
}

#[async_trait]
impl BlockCacheStore for InMemoryPolicyStorage {
    async fn get_cache(
        &self,
        policy_id: &PolicyId,
        block_id: &BlockId,
        user_did: &str,
        key: &str,
    ) -> StorageResult<Option<serde_json::Value>> {
        let value = {
            let guard = self
                .cache
                .read()
                .map_err(|_| StorageError::Backend("cache lock poisoned".to_string()))?;
            let entry = guard.get(&(
                policy_id.clone(),
                block_id.clone(),
                user_did.to_string(),
                key.to_string(),
            ));
            match entry {
                None => return Ok(None),
                Some(entry) => entry.value.clone(),
            }
        };

        match value {
            CacheValue::Inline(value) => Ok(Some(value)),
            CacheValue::Spilled(blob) => {
                let bytes = self.get_blob(&blob).await?;
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
        }
    }

    async fn set_cache(
        &self,
        policy_id: &PolicyId,
        block_id: &BlockId,
        user_did: &str,
        key: &str,
        value: serde_json::Value,
    ) -> StorageResult<()> {
        let serialized =
            serde_json::to_vec(&value).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let stored = if serialized.len() > SPILL_THRESHOLD_BYTES {
            CacheValue::Spilled(self.put_blob(serialized).await?)
        } else {
            CacheValue::Inline(value)
        };

        let mut guard = self
            .cache
            .write()
            .map_err(|_| StorageError::Backend("cache lock poisoned".to_string()))?;
        guard.insert(
            (
                policy_id.clone(),
                block_id.clone(),
                user_did.to_string(),
                key.to_string(),
            ),
            BlockCacheEntry {
                policy_id: policy_id.clone(),
                block_id: block_id.clone(),
                user_did: user_did.to_string(),
                key: key.to_string(),
                value: stored,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl BlobStore for InMemoryPolicyStorage {
    async fn put_blob(&self, bytes: Vec<u8>) -> StorageResult<BlobRef> {
        let blob = BlobRef::for_bytes(&bytes);
        let mut guard = self
            .blobs
            .write()
            .map_err(|_| StorageError::Backend("blobs lock poisoned".to_string()))?;
        guard.insert(blob.clone(), bytes);
        Ok(blob)
    }

    async fn get_blob(&self, blob: &BlobRef) -> StorageResult<Vec<u8>> {
        let guard = self
            .blobs
            .read()
            .map_err(|_| StorageError::Backend("blobs lock poisoned".to_string()))?;
        guard
            .get(blob)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("blob {blob} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentKind;
    use serde_json::json;

    fn make_record(policy_id: &PolicyId, id: &str) -> DocumentRecord {
        DocumentRecord::new(
            policy_id.clone(),
            "did:aegis:alice",
            DocumentKind::Credential,
            json!({"id": id}),
        )
        .with_id(id)
    }

    #[tokio::test]
    async fn save_and_find_by_filter() {
        let storage = InMemoryPolicyStorage::new();
        let policy_id = PolicyId::new("p-1");

        storage.save(make_record(&policy_id, "a")).await.unwrap();
        storage.save(make_record(&policy_id, "b")).await.unwrap();
        storage
            .save(make_record(&PolicyId::new("p-2"), "c"))
            .await
            .unwrap();

        let found = storage
            .find(DocumentFilter::for_policy(policy_id))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn delete_is_a_tombstone() {
        let storage = InMemoryPolicyStorage::new();
        let policy_id = PolicyId::new("p-1");
        storage.save(make_record(&policy_id, "a")).await.unwrap();

        storage.delete(&policy_id, "a").await.unwrap();

        let visible = storage
            .find(DocumentFilter::for_policy(policy_id.clone()))
            .await
            .unwrap();
        assert!(visible.is_empty());

        let all = storage
            .find(DocumentFilter::for_policy(policy_id.clone()).include_deleted())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].deleted);

        let row = storage.get(&policy_id, "a").await.unwrap().unwrap();
        assert!(row.deleted);
    }

    #[tokio::test]
    async fn incremental_scan_resumes_from_timestamp() {
        let storage = InMemoryPolicyStorage::new();
        let policy_id = PolicyId::new("p-1");
        let first = storage.save(make_record(&policy_id, "a")).await.unwrap();

        let updated = storage
            .find(DocumentFilter::for_policy(policy_id.clone()).updated_since(first.updated_at))
            .await
            .unwrap();
        assert!(updated.is_empty());

        storage.save(make_record(&policy_id, "b")).await.unwrap();
        let updated = storage
            .find(DocumentFilter::for_policy(policy_id).updated_since(first.updated_at))
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, "b");
    }

    #[tokio::test]
    async fn small_cache_values_stay_inline() {
        let storage = InMemoryPolicyStorage::new();
        let policy_id = PolicyId::new("p-1");
        let block_id = BlockId::new("b-1");

        storage
            .set_cache(&policy_id, &block_id, "did:aegis:alice", "state", json!(42))
            .await
            .unwrap();

        let value = storage
            .get_cache(&policy_id, &block_id, "did:aegis:alice", "state")
            .await
            .unwrap();
        assert_eq!(value, Some(json!(42)));

        // Nothing was spilled
        assert!(storage.blobs.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn large_cache_values_spill_and_rehydrate() {
        let storage = InMemoryPolicyStorage::new();
        let policy_id = PolicyId::new("p-1");
        let block_id = BlockId::new("b-1");

        let big = json!({ "payload": "x".repeat(SPILL_THRESHOLD_BYTES * 2) });
        storage
            .set_cache(&policy_id, &block_id, "did:aegis:alice", "doc", big.clone())
            .await
            .unwrap();

        assert_eq!(storage.blobs.read().unwrap().len(), 1);

        let value = storage
            .get_cache(&policy_id, &block_id, "did:aegis:alice", "doc")
            .await
            .unwrap();
        assert_eq!(value, Some(big));
    }

    #[tokio::test]
    async fn cache_entries_are_user_scoped() {
        let storage = InMemoryPolicyStorage::new();
        let policy_id = PolicyId::new("p-1");
        let block_id = BlockId::new("b-1");

        storage
            .set_cache(&policy_id, &block_id, "did:aegis:alice", "k", json!("alice"))
            .await
            .unwrap();
        storage
            .set_cache(&policy_id, &block_id, "did:aegis:bob", "k", json!("bob"))
            .await
            .unwrap();

        let alice = storage
            .get_cache(&policy_id, &block_id, "did:aegis:alice", "k")
            .await
            .unwrap();
        let bob = storage
            .get_cache(&policy_id, &block_id, "did:aegis:bob", "k")
            .await
            .unwrap();
        assert_eq!(alice, Some(json!("alice")));
        assert_eq!(bob, Some(json!("bob")));
    }

    #[tokio::test]
    async fn file_roundtrip() {
        let storage = InMemoryPolicyStorage::new();
        let file_id = storage.save_file(b"body".to_vec()).await.unwrap();
        let bytes = storage.load_file(&file_id).await.unwrap();
        assert_eq!(bytes, b"body");

        let missing = storage.load_file("nope").await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }
}
