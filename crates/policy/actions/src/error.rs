use policy_types::ActionId;
use thiserror::Error;

/// Result type for action protocol operations.
pub type ActionResult<T> = Result<T, ActionError>;

/// Action-protocol errors.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action {0} not found")]
    NotFound(ActionId),

    #[error("no pending request for block '{0}'")]
    NoPendingRequest(String),

    #[error("action {id} is {found}, expected {expected}")]
    InvalidState {
        id: ActionId,
        expected: String,
        found: String,
    },

    #[error("actor-side execution failed: {0}")]
    Executor(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<ActionError> for policy_types::PolicyError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::NotFound(id) => policy_types::PolicyError::ActionNotFound(id),
            ActionError::InvalidState {
                id,
                expected,
                found,
            } => policy_types::PolicyError::ProtocolMismatch {
                action: id,
                message: format!("expected {expected}, found {found}"),
            },
            other => policy_types::PolicyError::Storage(other.to_string()),
        }
    }
}
