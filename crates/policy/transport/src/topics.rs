//! Topic names for the engine's message boundary.

use policy_types::PolicyId;

/// Execute a single block against a user without persisting side effects.
pub const DRY_RUN_BLOCK: &str = "policy.dry-run-block";

/// Validate a policy configuration tree and return the accumulated report.
pub const VALIDATE_POLICY: &str = "policy.validate";

/// Describe the registered block types and their capabilities.
pub const GET_BLOCK_ABOUT: &str = "policy.block-about";

/// Deliver external tool data into a running policy.
pub const TOOL_EVENT: &str = "policy.tool-event";

/// Broadcast for completed two-phase actions: `{ id, data, error }`.
pub const TASK_COMPLETE_BROADCAST: &str = "policy.task-complete";

/// Per-instance "ready to serve" notification.
pub fn policy_ready(policy_id: &PolicyId) -> String {
    format!("policy.{policy_id}.ready")
}

/// Per-instance "state changed" notification, debounced per dispatch wave.
pub fn policy_state_changed(policy_id: &PolicyId) -> String {
    format!("policy.{policy_id}.state")
}

/// Cross-instance event forwarding topic for one policy instance.
pub fn policy_events(policy_id: &PolicyId) -> String {
    format!("policy.{policy_id}.events")
}
