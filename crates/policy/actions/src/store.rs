//! Durable action row storage.

use crate::{ActionError, ActionPhase, ActionRecord, ActionResult, ActionStatus};
use async_trait::async_trait;
use policy_types::{AccountId, ActionId, BlockTag, PolicyId};
use std::collections::HashMap;
use std::sync::RwLock;

/// Storage contract for action rows.
///
/// Rows are keyed by `(correlation id, phase)`; the protocol writes a row at
/// every transition so a restart never loses an in-flight action.
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Insert or overwrite a row.
    async fn save(&self, record: ActionRecord) -> ActionResult<()>;

    /// Get one row.
    async fn get(&self, id: &ActionId, phase: ActionPhase) -> ActionResult<Option<ActionRecord>>;

    /// Latest still-pending request for a block and responder account.
    async fn find_request(
        &self,
        policy_id: &PolicyId,
        block_tag: &BlockTag,
        account_id: &AccountId,
    ) -> ActionResult<Option<ActionRecord>>;

    /// All rows for a policy, oldest-first.
    async fn list(&self, policy_id: &PolicyId) -> ActionResult<Vec<ActionRecord>>;
}

/// In-memory action store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryActionStore {
    rows: RwLock<HashMap<(ActionId, ActionPhase), ActionRecord>>,
}

impl InMemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionStore for InMemoryActionStore {
    async fn save(&self, record: ActionRecord) -> ActionResult<()> {
        let mut guard = self
            .rows
            .write()
            .map_err(|_| ActionError::Store("rows lock poisoned".to_string()))?;
        guard.insert((record.id.clone(), record.phase), record);
        Ok(())
    }

    async fn get(&self, id: &ActionId, phase: ActionPhase) -> ActionResult<Option<ActionRecord>> {
        let guard = self
            .rows
            .read()
            .map_err(|_| ActionError::Store("rows lock poisoned".to_string()))?;
        Ok(guard.get(&(id.clone(), phase)).cloned())
    }

    async fn find_request(
        &self,
        policy_id: &PolicyId,
        block_tag: &BlockTag,
        account_id: &AccountId,
    ) -> ActionResult<Option<ActionRecord>> {
        let guard = self
            .rows
            .read()
            .map_err(|_| ActionError::Store("rows lock poisoned".to_string()))?;
        let mut candidates = guard
            .values()
            .filter(|row| {
                row.phase == ActionPhase::Request
                    && row.status == ActionStatus::Requested
                    && &row.policy_id == policy_id
                    && &row.block_tag == block_tag
                    && &row.account_id == account_id
            })
            .cloned()
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(candidates.pop())
    }

    async fn list(&self, policy_id: &PolicyId) -> ActionResult<Vec<ActionRecord>> {
        let guard = self
            .rows
            .read()
            .map_err(|_| ActionError::Store("rows lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|row| &row.policy_id == policy_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(values)
    }
}
