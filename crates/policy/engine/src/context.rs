//! Per-policy dependency bundle.
//!
//! Everything a running policy needs is constructed explicitly and passed
//! through this context; there is no global state shared between concurrently
//! loaded policies.

use crate::transform::TransformPool;
use policy_actions::{ActionProtocol, ActionStore};
use policy_storage::{BlockCacheStore, DocumentStore, PolicyStorage};
use policy_transport::MessageTransport;
use policy_types::{BlockTag, PolicyId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const TRANSFORM_WORKERS: usize = 2;
const TRANSFORM_QUEUE: usize = 64;
const TRANSFORM_TIMEOUT: Duration = Duration::from_secs(10);

/// Explicitly constructed per-policy service bundle.
#[derive(Clone)]
pub struct PolicyContext {
    pub policy_id: PolicyId,
    /// DID of the policy owner
    pub owner: String,
    pub documents: Arc<dyn DocumentStore>,
    pub cache: Arc<dyn BlockCacheStore>,
    pub transport: Arc<dyn MessageTransport>,
    pub actions: Arc<ActionProtocol>,
    pub transforms: Arc<TransformPool>,
    /// Tags served by other running policy instances, for cross-process
    /// event forwarding
    pub remote_tags: Arc<HashMap<BlockTag, PolicyId>>,
}

impl PolicyContext {
    /// Wire a context from one storage bundle plus transport and action
    /// persistence.
    pub fn new<S>(
        policy_id: PolicyId,
        owner: impl Into<String>,
        storage: Arc<S>,
        transport: Arc<dyn MessageTransport>,
        action_store: Arc<dyn ActionStore>,
    ) -> Self
    where
        S: PolicyStorage + 'static,
    {
        let actions = Arc::new(ActionProtocol::new(policy_id.clone(), action_store));
        Self {
            policy_id,
            owner: owner.into(),
            documents: storage.clone(),
            cache: storage,
            transport,
            actions,
            transforms: Arc::new(TransformPool::new(
                TRANSFORM_WORKERS,
                TRANSFORM_QUEUE,
                TRANSFORM_TIMEOUT,
            )),
            remote_tags: Arc::new(HashMap::new()),
        }
    }

    /// Declare tags that live in other running policy instances.
    pub fn with_remote_tags(mut self, remote_tags: HashMap<BlockTag, PolicyId>) -> Self {
        self.remote_tags = Arc::new(remote_tags);
        self
    }

    pub fn with_transform_pool(mut self, pool: Arc<TransformPool>) -> Self {
        self.transforms = pool;
        self
    }
}
