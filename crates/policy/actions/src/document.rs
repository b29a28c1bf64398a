//! Action-specific payloads.
//!
//! Each variant carries the request fields plus the outcome fields the actor
//! fills in on response. The variant name doubles as the action-type tag in
//! the serialized document.

use serde::{Deserialize, Serialize};

/// The canonical action document exchanged between the two phases.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActionDocument {
    /// Associate a ledger token with the actor's account
    AssociateToken {
        token_id: String,
        /// Outcome: whether the association succeeded
        #[serde(default, skip_serializing_if = "Option::is_none")]
        associated: Option<bool>,
    },
    /// Dissociate a ledger token from one of the actor's wallets
    DissociateToken {
        token_id: String,
        /// Wallet the dissociation applies to; a correlation field
        wallet: String,
        /// Outcome: whether the dissociation succeeded
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dissociated: Option<bool>,
    },
    /// Countersign a payload held by the actor
    SignApproval {
        payload: serde_json::Value,
        /// Outcome: the produced signature
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

impl ActionDocument {
    /// Action-type tag, stable across serialization.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionDocument::AssociateToken { .. } => "AssociateToken",
            ActionDocument::DissociateToken { .. } => "DissociateToken",
            ActionDocument::SignApproval { .. } => "SignApproval",
        }
    }

    /// Whether the protocol-specific post-condition holds on this document.
    pub fn outcome_ok(&self) -> bool {
        match self {
            ActionDocument::AssociateToken { associated, .. } => *associated == Some(true),
            ActionDocument::DissociateToken { dissociated, .. } => *dissociated == Some(true),
            ActionDocument::SignApproval { signature, .. } => signature.is_some(),
        }
    }

    /// The wallet correlation field, for action kinds that carry one.
    pub fn wallet(&self) -> Option<&str> {
        match self {
            ActionDocument::DissociateToken { wallet, .. } => Some(wallet),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_tag_in_serialized_form() {
        let doc = ActionDocument::AssociateToken {
            token_id: "0.0.500".into(),
            associated: None,
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["type"], json!("AssociateToken"));
    }

    #[test]
    fn test_outcome_requires_positive_result() {
        let pending = ActionDocument::AssociateToken {
            token_id: "t".into(),
            associated: None,
        };
        let failed = ActionDocument::AssociateToken {
            token_id: "t".into(),
            associated: Some(false),
        };
        let done = ActionDocument::AssociateToken {
            token_id: "t".into(),
            associated: Some(true),
        };
        assert!(!pending.outcome_ok());
        assert!(!failed.outcome_ok());
        assert!(done.outcome_ok());
    }

    #[test]
    fn test_only_dissociation_carries_a_wallet() {
        let dissociate = ActionDocument::DissociateToken {
            token_id: "t".into(),
            wallet: "w1".into(),
            dissociated: None,
        };
        assert_eq!(dissociate.wallet(), Some("w1"));

        let associate = ActionDocument::AssociateToken {
            token_id: "t".into(),
            associated: None,
        };
        assert_eq!(associate.wallet(), None);
    }
}
