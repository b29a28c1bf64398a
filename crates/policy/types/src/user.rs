//! Policy user descriptor.
//!
//! The identity layer (out of engine scope) resolves sessions into this
//! descriptor; the engine only ever reads it.

use crate::AccountId;
use serde::{Deserialize, Serialize};

/// A resolved policy participant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUser {
    /// Decentralized identifier
    pub did: String,
    /// Display name
    pub username: String,
    /// Ledger account the user operates with
    pub account_id: AccountId,
    /// Role assigned inside the policy, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl PolicyUser {
    pub fn new(
        did: impl Into<String>,
        username: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            did: did.into(),
            username: username.into(),
            account_id: AccountId::new(account_id),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_role() {
        let user = PolicyUser::new("did:aegis:alice", "alice", "0.0.100");
        assert!(user.role.is_none());

        let approver = user.with_role("Approver");
        assert_eq!(approver.role.as_deref(), Some("Approver"));
    }
}
