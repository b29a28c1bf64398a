//! Error types shared across the policy engine crates.

use crate::{ActionId, BlockId, BlockTag, PolicyId};
use serde::{Deserialize, Serialize};

/// Errors that can occur while building or running a policy
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Raised at build time; the tree cannot be used
    #[error("Block init failed ({block_type} {id}): {message}")]
    BlockInit {
        message: String,
        block_type: String,
        id: BlockId,
    },

    /// Recoverable at the call site; carries block context
    #[error("Block action failed ({block_type} {id}): {message}")]
    BlockAction {
        message: String,
        block_type: String,
        id: BlockId,
    },

    #[error("Unknown block type: '{0}'")]
    UnknownBlockType(String),

    #[error("Duplicate block tag: '{0}'")]
    DuplicateTag(BlockTag),

    #[error("Unresolved tag reference: '{0}'")]
    TagNotFound(BlockTag),

    #[error("Block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("Policy not found: {0}")]
    PolicyNotFound(PolicyId),

    #[error("Event loop detected at '{tag}' ({event})")]
    EventLoop { tag: BlockTag, event: String },

    /// An action response failed its correlation check
    #[error("Action correlation mismatch for {action}: {message}")]
    ProtocolMismatch { action: ActionId, message: String },

    #[error("Action not found: {0}")]
    ActionNotFound(ActionId),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl PolicyError {
    /// Build-time failure with block context
    pub fn block_init(message: impl Into<String>, block_type: impl Into<String>, id: BlockId) -> Self {
        Self::BlockInit {
            message: message.into(),
            block_type: block_type.into(),
            id,
        }
    }

    /// Runtime failure with block context
    pub fn block_action(
        message: impl Into<String>,
        block_type: impl Into<String>,
        id: BlockId,
    ) -> Self {
        Self::BlockAction {
            message: message.into(),
            block_type: block_type.into(),
            id,
        }
    }

    /// Standard error for a capability a block type does not implement
    pub fn unsupported(operation: &str, block_type: impl Into<String>, id: BlockId) -> Self {
        Self::BlockAction {
            message: format!("'{operation}' is not supported"),
            block_type: block_type.into(),
            id,
        }
    }
}

/// Result type alias for policy operations
pub type PolicyResult<T> = Result<T, PolicyError>;

/// One accumulated validation finding, keyed by the offending block.
///
/// Validation never halts on a failure; findings are collected into a report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub block_id: BlockId,
    pub block_type: String,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(
        block_id: BlockId,
        block_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            block_id,
            block_type: block_type.into(),
            message: message.into(),
        }
    }
}
