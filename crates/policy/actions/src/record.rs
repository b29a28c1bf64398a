//! Persisted action rows.

use crate::ActionDocument;
use chrono::{DateTime, Utc};
use policy_types::{AccountId, ActionId, BlockTag, PolicyId, PolicyUser};
use serde::{Deserialize, Serialize};

/// Lifecycle of a two-phase action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Persisted by the policy side, awaiting the external actor
    Requested,
    /// The actor submitted an outcome; correlation not yet checked
    Responded,
    /// Correlation held and the post-condition is satisfied
    Completed,
    /// Correlation fields disagreed; never auto-corrected
    Invalid,
    /// Correlation held but the actor-side outcome was negative
    Errored,
}

impl ActionStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Completed | ActionStatus::Invalid | ActionStatus::Errored
        )
    }
}

/// Which side of the exchange a row records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionPhase {
    Request,
    Response,
}

/// One persisted action row. Request and response are separate rows sharing
/// the correlation id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Correlation id, generated at request time
    pub id: ActionId,
    pub policy_id: PolicyId,
    /// Tag of the block that initiated the action
    pub block_tag: BlockTag,
    /// Account of the expected responder; a correlation field
    pub account_id: AccountId,
    /// DID of the initiating user
    pub owner_did: String,
    /// Wallet the action applies to, where relevant; a correlation field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
    pub phase: ActionPhase,
    pub document: ActionDocument,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionRecord {
    /// Build a fresh request row for delivery to the external actor.
    pub fn request(
        policy_id: PolicyId,
        block_tag: BlockTag,
        user: &PolicyUser,
        wallet: Option<String>,
        document: ActionDocument,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ActionId::generate(),
            policy_id,
            block_tag,
            account_id: user.account_id.clone(),
            owner_did: user.did.clone(),
            wallet,
            phase: ActionPhase::Request,
            document,
            status: ActionStatus::Requested,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the response row for this request, carrying the actor's outcome.
    pub fn respond_with(
        &self,
        actor: &PolicyUser,
        wallet: Option<String>,
        document: ActionDocument,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: self.id.clone(),
            policy_id: self.policy_id.clone(),
            block_tag: self.block_tag.clone(),
            account_id: actor.account_id.clone(),
            owner_did: self.owner_did.clone(),
            wallet,
            phase: ActionPhase::Response,
            document,
            status: ActionStatus::Responded,
            created_at: self.created_at,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ActionStatus) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }
}
