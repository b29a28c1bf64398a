//! The protocol driver.

use crate::{
    ActionDocument, ActionError, ActionPhase, ActionRecord, ActionResult, ActionStatus,
    ActionStore,
};
use async_trait::async_trait;
use policy_types::{ActionId, BlockTag, PolicyId, PolicyUser};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// The actor-local side effect re-executed during the response phase.
///
/// Ledger clients are out of engine scope; the responding service plugs its
/// implementation in here. The executor receives the request row and returns
/// the outcome document.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, request: &ActionRecord) -> ActionResult<ActionDocument>;
}

/// Coordinates two-phase actions for one policy instance.
pub struct ActionProtocol {
    policy_id: PolicyId,
    store: Arc<dyn ActionStore>,
    callbacks: Mutex<HashMap<ActionId, oneshot::Sender<ActionRecord>>>,
}

impl ActionProtocol {
    pub fn new(policy_id: PolicyId, store: Arc<dyn ActionStore>) -> Self {
        Self {
            policy_id,
            store,
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy_id(&self) -> &PolicyId {
        &self.policy_id
    }

    /// Phase one: build the canonical action document, persist it as
    /// `Requested`, and return it for delivery to the external actor.
    /// How the row travels to the actor is the caller's concern.
    pub async fn request(
        &self,
        block_tag: BlockTag,
        user: &PolicyUser,
        wallet: Option<String>,
        document: ActionDocument,
    ) -> ActionResult<ActionRecord> {
        let record = ActionRecord::request(
            self.policy_id.clone(),
            block_tag,
            user,
            wallet,
            document,
        );
        self.store.save(record.clone()).await?;
        tracing::info!(
            action_id = %record.id,
            block_tag = %record.block_tag,
            kind = record.document.kind(),
            "Action requested"
        );
        Ok(record)
    }

    /// Register interest in the terminal outcome of a request. The receiver
    /// resolves at most once, when [`handle_response`](Self::handle_response)
    /// reaches a terminal state.
    pub fn register_callback(&self, id: &ActionId) -> oneshot::Receiver<ActionRecord> {
        let (tx, rx) = oneshot::channel();
        self.callbacks
            .lock()
            .expect("callbacks lock poisoned")
            .insert(id.clone(), tx);
        rx
    }

    /// Phase two, actor side: look the pending request up by `(policy,
    /// block)`, re-execute the local side effect, and persist the outcome as
    /// `Responded`. The returned row is what the actor delivers back.
    pub async fn response(
        &self,
        block_tag: &BlockTag,
        actor: &PolicyUser,
        wallet: Option<String>,
        executor: &dyn ActionExecutor,
    ) -> ActionResult<ActionRecord> {
        let request = self
            .store
            .find_request(&self.policy_id, block_tag, &actor.account_id)
            .await?
            .ok_or_else(|| ActionError::NoPendingRequest(block_tag.to_string()))?;

        let outcome = executor.execute(&request).await?;
        let response = request.respond_with(actor, wallet, outcome);
        self.store.save(response.clone()).await?;
        tracing::info!(
            action_id = %response.id,
            block_tag = %response.block_tag,
            "Action responded"
        );
        Ok(response)
    }

    /// Pure predicate: does the response document satisfy the protocol's
    /// post-condition (e.g. `associated == true`)?
    pub fn complete(record: &ActionRecord) -> bool {
        record.document.outcome_ok()
    }

    /// Pure correlation check between a request and its response.
    ///
    /// The immutable correlation fields must agree even though the ids
    /// already matched; this guards against a response being replayed
    /// against the wrong request. Account ids must always match; for
    /// dissociation the wallet must match as well.
    pub fn validate(request: &ActionRecord, response: &ActionRecord) -> bool {
        if request.account_id != response.account_id {
            return false;
        }
        if request.document.wallet().is_some() || response.document.wallet().is_some() {
            if request.wallet != response.wallet {
                return false;
            }
            if request.document.wallet() != response.document.wallet() {
                return false;
            }
        }
        true
    }

    /// Phase two, policy side: correlate an incoming response against the
    /// persisted request and settle the action.
    ///
    /// - correlation mismatch → `Invalid`, logged, never auto-corrected
    /// - correlation holds, post-condition holds → `Completed`
    /// - correlation holds, outcome negative → `Errored`
    ///
    /// The registered callback (if any) fires exactly once with the settled
    /// row. A response whose request row is unknown is an error; after a
    /// restart the request rows come back from the store, so recovery is by
    /// durable lookup, not blind trust.
    pub async fn handle_response(&self, response: ActionRecord) -> ActionResult<ActionRecord> {
        let request = self
            .store
            .get(&response.id, ActionPhase::Request)
            .await?
            .ok_or_else(|| ActionError::NotFound(response.id.clone()))?;

        if request.status.is_terminal() {
            return Err(ActionError::InvalidState {
                id: request.id,
                expected: "Requested".to_string(),
                found: format!("{:?}", request.status),
            });
        }

        let settled = if !Self::validate(&request, &response) {
            tracing::warn!(
                action_id = %response.id,
                block_tag = %response.block_tag,
                "Action correlation mismatch; marking invalid"
            );
            response.with_status(ActionStatus::Invalid)
        } else if Self::complete(&response) {
            response.with_status(ActionStatus::Completed)
        } else {
            response.with_status(ActionStatus::Errored)
        };

        self.store.save(settled.clone()).await?;
        self.store
            .save(request.with_status(match settled.status {
                ActionStatus::Completed => ActionStatus::Completed,
                ActionStatus::Invalid => ActionStatus::Invalid,
                _ => ActionStatus::Errored,
            }))
            .await?;

        let callback = self
            .callbacks
            .lock()
            .expect("callbacks lock poisoned")
            .remove(&settled.id);
        if let Some(tx) = callback {
            // Receiver may have been dropped; that is the caller's choice
            let _ = tx.send(settled.clone());
        }

        Ok(settled)
    }
}
