use crate::model::{BlobRef, DocumentFilter, DocumentRecord};
use crate::StorageResult;
use async_trait::async_trait;
use policy_types::{BlockId, PolicyId};

/// Storage interface for policy document rows.
///
/// Scans are resumable through `DocumentFilter::updated_since`; no global
/// lock may be held across a full scan.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Find documents matching a filter, oldest-first by update time.
    async fn find(&self, filter: DocumentFilter) -> StorageResult<Vec<DocumentRecord>>;

    /// Get one row by id.
    async fn get(&self, policy_id: &PolicyId, id: &str) -> StorageResult<Option<DocumentRecord>>;

    /// Insert or update a row. Bumps `updated_at`.
    async fn save(&self, record: DocumentRecord) -> StorageResult<DocumentRecord>;

    /// Tombstone a row. The row is retained with `deleted = true`.
    async fn delete(&self, policy_id: &PolicyId, id: &str) -> StorageResult<()>;

    /// Store an externally kept document body, returning its file id.
    async fn save_file(&self, bytes: Vec<u8>) -> StorageResult<String>;

    /// Fetch an externally kept document body.
    async fn load_file(&self, file_id: &str) -> StorageResult<Vec<u8>>;
}

/// Storage interface for per-user block cache entries.
///
/// Entries are keyed by `(policy, block, key, user)`. Values whose serialized
/// size exceeds the spill threshold are stored in the blob store and only the
/// address is retained; reads rehydrate transparently. There is no implicit
/// expiry.
#[async_trait]
pub trait BlockCacheStore: Send + Sync {
    async fn get_cache(
        &self,
        policy_id: &PolicyId,
        block_id: &BlockId,
        user_did: &str,
        key: &str,
    ) -> StorageResult<Option<serde_json::Value>>;

    async fn set_cache(
        &self,
        policy_id: &PolicyId,
        block_id: &BlockId,
        user_did: &str,
        key: &str,
        value: serde_json::Value,
    ) -> StorageResult<()>;
}

/// Content-addressed blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_blob(&self, bytes: Vec<u8>) -> StorageResult<BlobRef>;
    async fn get_blob(&self, blob: &BlobRef) -> StorageResult<Vec<u8>>;
}

/// Unified storage bundle used to construct a policy context.
pub trait PolicyStorage: DocumentStore + BlockCacheStore + BlobStore + Send + Sync {}

impl<T> PolicyStorage for T where T: DocumentStore + BlockCacheStore + BlobStore + Send + Sync {}
