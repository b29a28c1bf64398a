//! Per-user cache facade for block handlers.
//!
//! Entries are keyed by `(policy, block, key, user)`. Invalidation is the
//! caller's responsibility through explicit writes; nothing expires on its
//! own. Value-size spilling is handled underneath by the cache store.

use policy_storage::BlockCacheStore;
use policy_types::{BlockId, PolicyError, PolicyId, PolicyResult, PolicyUser};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Scope used for entries not bound to one user.
const GLOBAL_SCOPE: &str = "all";

/// Cache handle scoped to one block.
#[derive(Clone)]
pub struct BlockUserCache {
    policy_id: PolicyId,
    block_id: BlockId,
    store: Arc<dyn BlockCacheStore>,
}

impl BlockUserCache {
    pub fn new(policy_id: PolicyId, block_id: BlockId, store: Arc<dyn BlockCacheStore>) -> Self {
        Self {
            policy_id,
            block_id,
            store,
        }
    }

    fn scope(user: Option<&PolicyUser>) -> &str {
        user.map(|u| u.did.as_str()).unwrap_or(GLOBAL_SCOPE)
    }

    /// Read a cached value; `None` user reads the block-global scope.
    pub async fn get_cache<T: DeserializeOwned>(
        &self,
        key: &str,
        user: Option<&PolicyUser>,
    ) -> PolicyResult<Option<T>> {
        let value = self
            .store
            .get_cache(&self.policy_id, &self.block_id, Self::scope(user), key)
            .await?;
        match value {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| PolicyError::Serialization(e.to_string())),
        }
    }

    /// Write a cached value; `None` user writes the block-global scope.
    pub async fn set_cache<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        user: Option<&PolicyUser>,
    ) -> PolicyResult<()> {
        let value =
            serde_json::to_value(value).map_err(|e| PolicyError::Serialization(e.to_string()))?;
        self.store
            .set_cache(&self.policy_id, &self.block_id, Self::scope(user), key, value)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_storage::InMemoryPolicyStorage;

    fn make_cache(store: &Arc<InMemoryPolicyStorage>) -> BlockUserCache {
        BlockUserCache::new(
            PolicyId::new("p-1"),
            BlockId::new("b-1"),
            store.clone() as Arc<dyn BlockCacheStore>,
        )
    }

    #[tokio::test]
    async fn typed_roundtrip_per_user() {
        let store = Arc::new(InMemoryPolicyStorage::new());
        let cache = make_cache(&store);
        let alice = PolicyUser::new("did:aegis:alice", "alice", "0.0.100");
        let bob = PolicyUser::new("did:aegis:bob", "bob", "0.0.101");

        cache
            .set_cache("count", &3u64, Some(&alice))
            .await
            .unwrap();

        let for_alice: Option<u64> = cache.get_cache("count", Some(&alice)).await.unwrap();
        let for_bob: Option<u64> = cache.get_cache("count", Some(&bob)).await.unwrap();
        assert_eq!(for_alice, Some(3));
        assert_eq!(for_bob, None);
    }

    #[tokio::test]
    async fn global_scope_is_shared() {
        let store = Arc::new(InMemoryPolicyStorage::new());
        let cache = make_cache(&store);

        cache
            .set_cache("flag", &true, None)
            .await
            .unwrap();
        let value: Option<bool> = cache.get_cache("flag", None).await.unwrap();
        assert_eq!(value, Some(true));
    }
}
