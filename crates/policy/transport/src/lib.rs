//! Message transport contract for the Aegis policy engine.
//!
//! The engine is message-driven: boundary requests come in over named topics,
//! notifications and cross-instance event forwarding go out the same way.
//! This crate defines the contract (`publish`, `subscribe`, `request`) and an
//! in-memory bus for tests and single-process deployments. The production
//! broker adapter lives with the excluded gateway layer.

#![deny(unsafe_code)]

mod memory;
pub mod topics;

pub use memory::InMemoryTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no responder on topic '{0}'")]
    NoResponder(String),

    #[error("request timed out on topic '{0}'")]
    Timeout(String),

    #[error("subscription lagged, {0} messages dropped")]
    Lagged(u64),

    #[error("channel closed")]
    Closed,

    #[error("message carries no reply address")]
    NoReplyAddress,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<TransportError> for policy_types::PolicyError {
    fn from(err: TransportError) -> Self {
        policy_types::PolicyError::Transport(err.to_string())
    }
}

/// One message on the bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportMessage {
    pub topic: String,
    pub payload: serde_json::Value,
    /// Set on requests; echoed back on the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Topic the responder should publish its reply to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl TransportMessage {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            correlation_id: None,
            reply_to: None,
        }
    }
}

/// The transport contract the engine consumes.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Fire-and-forget publish. Succeeds even with no subscribers.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> TransportResult<()>;

    /// Subscribe to a topic. Messages published after this call are delivered.
    async fn subscribe(&self, topic: &str) -> TransportResult<broadcast::Receiver<TransportMessage>>;

    /// Request/reply with a timeout. The responder must publish the reply to
    /// the message's `reply_to` topic, echoing `correlation_id`.
    async fn request(
        &self,
        topic: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> TransportResult<serde_json::Value>;

    /// Publish a reply to a request message.
    async fn respond(
        &self,
        request: &TransportMessage,
        payload: serde_json::Value,
    ) -> TransportResult<()> {
        let reply_to = request
            .reply_to
            .as_deref()
            .ok_or(TransportError::NoReplyAddress)?;
        self.publish(reply_to, payload).await
    }
}
