//! In-memory bus over tokio broadcast channels.

use crate::{MessageTransport, TransportError, TransportMessage, TransportResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// Single-process message bus. Every topic is its own broadcast channel,
/// created lazily on first publish or subscribe.
#[derive(Default)]
pub struct InMemoryTransport {
    channels: Mutex<HashMap<String, broadcast::Sender<TransportMessage>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<TransportMessage> {
        let mut guard = self.channels.lock().expect("transport lock poisoned");
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn send(&self, message: TransportMessage) {
        let sender = self.sender(&message.topic);
        // No receivers is not an error for fire-and-forget publishes
        let _ = sender.send(message);
    }
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> TransportResult<()> {
        self.send(TransportMessage::new(topic, payload));
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> TransportResult<broadcast::Receiver<TransportMessage>> {
        Ok(self.sender(topic).subscribe())
    }

    async fn request(
        &self,
        topic: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> TransportResult<serde_json::Value> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let reply_topic = format!("{topic}.reply.{correlation_id}");
        let mut reply_rx = self.sender(&reply_topic).subscribe();

        let request = TransportMessage {
            topic: topic.to_string(),
            payload,
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_topic.clone()),
        };

        let sender = self.sender(topic);
        if sender.receiver_count() == 0 {
            return Err(TransportError::NoResponder(topic.to_string()));
        }
        let _ = sender.send(request);

        match tokio::time::timeout(timeout, reply_rx.recv()).await {
            Ok(Ok(message)) => Ok(message.payload),
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => Err(TransportError::Lagged(n)),
            Ok(Err(broadcast::error::RecvError::Closed)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout(topic.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = InMemoryTransport::new();
        let mut rx1 = bus.subscribe("t").await.unwrap();
        let mut rx2 = bus.subscribe("t").await.unwrap();

        bus.publish("t", json!({"n": 1})).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap().payload, json!({"n": 1}));
        assert_eq!(rx2.recv().await.unwrap().payload, json!({"n": 1}));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = InMemoryTransport::new();
        bus.publish("nobody-listening", json!(1)).await.unwrap();
    }

    #[tokio::test]
    async fn request_reply_roundtrip() {
        let bus = std::sync::Arc::new(InMemoryTransport::new());

        let responder = bus.clone();
        let mut rx = responder.subscribe("echo").await.unwrap();
        tokio::spawn(async move {
            let message = rx.recv().await.unwrap();
            responder
                .respond(&message, json!({"echo": message.payload}))
                .await
                .unwrap();
        });

        let reply = bus
            .request("echo", json!("hello"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, json!({"echo": "hello"}));
    }

    #[tokio::test]
    async fn request_without_responder_fails_fast() {
        let bus = InMemoryTransport::new();
        let result = bus
            .request("silent", json!(1), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(TransportError::NoResponder(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out_when_responder_never_replies() {
        let bus = std::sync::Arc::new(InMemoryTransport::new());
        let _rx = bus.subscribe("slow").await.unwrap();

        let result = bus.request("slow", json!(1), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }
}
