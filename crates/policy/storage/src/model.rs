//! Stored record shapes.

use chrono::{DateTime, Utc};
use policy_types::{BlockId, PolicyId};
use serde::{Deserialize, Serialize};

/// What kind of document a row holds.
///
/// The engine treats these uniformly; the kind only matters for filtering
/// and for the backup engine's per-collection snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// Verifiable credential produced by a block
    Credential,
    /// Aggregated presentation
    Presentation,
    /// DID document
    Did,
    /// Block state snapshot
    State,
    /// Role assignment
    Role,
    /// Data received from an external source
    External,
}

/// One persisted document row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Row identifier, unique within the policy
    pub id: String,
    pub policy_id: PolicyId,
    /// DID of the owning user
    pub owner: String,
    pub kind: DocumentKind,
    /// The document body. Large bodies live in the blob store instead,
    /// referenced through `file_id`.
    pub document: serde_json::Value,
    /// Pointer to an externally stored body, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    /// Hash over metadata fields, maintained by the backup engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_hash: Option<String>,
    /// Hash over the body, maintained by the backup engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_hash: Option<String>,
    /// Tombstone flag; deleted rows are retained for diffing
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(
        policy_id: PolicyId,
        owner: impl Into<String>,
        kind: DocumentKind,
        document: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            policy_id,
            owner: owner.into(),
            kind,
            document,
            file_id: None,
            prop_hash: None,
            doc_hash: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }
}

/// Filter for document queries.
#[derive(Clone, Debug, Default)]
pub struct DocumentFilter {
    pub policy_id: Option<PolicyId>,
    pub kind: Option<DocumentKind>,
    pub owner: Option<String>,
    pub updated_since: Option<DateTime<Utc>>,
    pub include_deleted: bool,
}

impl DocumentFilter {
    pub fn for_policy(policy_id: PolicyId) -> Self {
        Self {
            policy_id: Some(policy_id),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: DocumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn updated_since(mut self, since: DateTime<Utc>) -> Self {
        self.updated_since = Some(since);
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Whether a record passes this filter.
    pub fn matches(&self, record: &DocumentRecord) -> bool {
        if let Some(policy_id) = &self.policy_id {
            if &record.policy_id != policy_id {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            if &record.owner != owner {
                return false;
            }
        }
        if let Some(since) = self.updated_since {
            if record.updated_at <= since {
                return false;
            }
        }
        if !self.include_deleted && record.deleted {
            return false;
        }
        true
    }
}

/// Content address of a stored blob (blake3 hex of the contents).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef(pub String);

impl BlobRef {
    pub fn for_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a cache value is stored in its index entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CacheValue {
    /// Small values live inline in the entry
    Inline(serde_json::Value),
    /// Large values are spilled to the blob store; only the address remains
    Spilled(BlobRef),
}

/// One per-user block cache entry, keyed by `(policy, block, key, user)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockCacheEntry {
    pub policy_id: PolicyId,
    pub block_id: BlockId,
    /// DID of the scoped user, or `"all"` for block-global entries
    pub user_did: String,
    pub key: String,
    pub value: CacheValue,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        let policy_id = PolicyId::new("p-1");
        let record = DocumentRecord::new(
            policy_id.clone(),
            "did:aegis:alice",
            DocumentKind::Credential,
            serde_json::json!({"field": 1}),
        );

        assert!(DocumentFilter::for_policy(policy_id.clone()).matches(&record));
        assert!(!DocumentFilter::for_policy(PolicyId::new("other")).matches(&record));
        assert!(!DocumentFilter::for_policy(policy_id.clone())
            .kind(DocumentKind::Did)
            .matches(&record));
        assert!(!DocumentFilter::for_policy(policy_id)
            .owner("did:aegis:bob")
            .matches(&record));
    }

    #[test]
    fn test_filter_excludes_deleted_by_default() {
        let policy_id = PolicyId::new("p-1");
        let mut record = DocumentRecord::new(
            policy_id.clone(),
            "did:aegis:alice",
            DocumentKind::Credential,
            serde_json::json!({}),
        );
        record.deleted = true;

        assert!(!DocumentFilter::for_policy(policy_id.clone()).matches(&record));
        assert!(DocumentFilter::for_policy(policy_id)
            .include_deleted()
            .matches(&record));
    }

    #[test]
    fn test_blob_ref_is_content_addressed() {
        let a = BlobRef::for_bytes(b"same bytes");
        let b = BlobRef::for_bytes(b"same bytes");
        let c = BlobRef::for_bytes(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
