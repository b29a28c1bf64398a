//! Message-boundary surface of the engine.
//!
//! The service subscribes to the engine's request topics, dispatches into
//! registered instances, and answers every request with a structured
//! payload. A failing handler is answered as an error; it never takes the
//! process down.

use crate::instance::PolicyInstance;
use crate::registry::BlockRegistry;
use crate::validator::{validate_config, ValidationResources};
use policy_transport::{topics, MessageTransport, TransportMessage, TransportResult};
use policy_types::{BlockConfig, BlockTag, PolicyError, PolicyId, PolicyResult, PolicyUser};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The engine's message-driven front door.
pub struct PolicyEngineService {
    transport: Arc<dyn MessageTransport>,
    registry: Arc<BlockRegistry>,
    resources: ValidationResources,
    instances: RwLock<HashMap<PolicyId, Arc<PolicyInstance>>>,
}

impl PolicyEngineService {
    pub fn new(transport: Arc<dyn MessageTransport>, registry: Arc<BlockRegistry>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            registry,
            resources: ValidationResources::default(),
            instances: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_resources(
        transport: Arc<dyn MessageTransport>,
        registry: Arc<BlockRegistry>,
        resources: ValidationResources,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            registry,
            resources,
            instances: RwLock::new(HashMap::new()),
        })
    }

    /// Take ownership of a built instance, wire its incoming event topic,
    /// and announce it as ready.
    pub async fn register_instance(
        &self,
        instance: PolicyInstance,
    ) -> PolicyResult<Arc<PolicyInstance>> {
        let policy_id = instance.context().policy_id.clone();
        let instance = Arc::new(instance);
        self.instances
            .write()
            .await
            .insert(policy_id.clone(), instance.clone());

        // Events forwarded here from other running instances
        let mut events_rx = self
            .transport
            .subscribe(&topics::policy_events(&policy_id))
            .await
            .map_err(PolicyError::from)?;
        let receiver = instance.clone();
        tokio::spawn(async move {
            loop {
                match events_rx.recv().await {
                    Ok(message) => {
                        if let Err(err) = deliver_forwarded(&receiver, &message.payload).await {
                            tracing::warn!(%err, "Forwarded event dropped");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.transport
            .publish(
                &topics::policy_ready(&policy_id),
                json!({ "policyId": policy_id }),
            )
            .await
            .map_err(PolicyError::from)?;
        tracing::info!(policy_id = %policy_id, "Policy instance registered");
        Ok(instance)
    }

    pub async fn instance(&self, policy_id: &PolicyId) -> Option<Arc<PolicyInstance>> {
        self.instances.read().await.get(policy_id).cloned()
    }

    /// Subscribe to all request topics and serve until the transport closes.
    pub async fn start(self: &Arc<Self>) -> TransportResult<()> {
        for topic in [
            topics::DRY_RUN_BLOCK,
            topics::VALIDATE_POLICY,
            topics::GET_BLOCK_ABOUT,
            topics::TOOL_EVENT,
        ] {
            let mut rx = self.transport.subscribe(topic).await?;
            let service = self.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(message) => service.serve_one(topic, message).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(topic, skipped, "Request listener lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }
        Ok(())
    }

    async fn serve_one(&self, topic: &'static str, message: TransportMessage) {
        let reply = match topic {
            topics::DRY_RUN_BLOCK => self.handle_dry_run(&message.payload).await,
            topics::VALIDATE_POLICY => self.handle_validate(&message.payload).await,
            topics::GET_BLOCK_ABOUT => Ok(self.registry.about()),
            topics::TOOL_EVENT => self.handle_tool_event(&message.payload).await,
            _ => Err(PolicyError::Transport(format!("unhandled topic '{topic}'"))),
        };

        let payload = match reply {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(topic, %err, "Request failed");
                json!({ "error": err.to_string() })
            }
        };

        if message.reply_to.is_some() {
            if let Err(err) = self.transport.respond(&message, payload).await {
                tracing::warn!(topic, %err, "Reply failed");
            }
        }
    }

    async fn handle_dry_run(&self, payload: &Value) -> PolicyResult<Value> {
        let policy_id = parse_policy_id(payload)?;
        let tag = payload
            .get("block")
            .and_then(Value::as_str)
            .ok_or_else(|| PolicyError::Transport("missing 'block'".to_string()))?;
        let user = parse_user(payload)?;
        let data = payload.get("data").cloned().unwrap_or(Value::Null);

        let instance = self
            .instance(&policy_id)
            .await
            .ok_or(PolicyError::PolicyNotFound(policy_id))?;
        let data = instance
            .dry_run_block(&BlockTag::new(tag), &user, data)
            .await?;
        Ok(json!({ "data": data }))
    }

    async fn handle_validate(&self, payload: &Value) -> PolicyResult<Value> {
        let config = payload
            .get("policy")
            .cloned()
            .ok_or_else(|| PolicyError::Transport("missing 'policy'".to_string()))?;
        let config: BlockConfig = serde_json::from_value(config)
            .map_err(|e| PolicyError::Serialization(e.to_string()))?;

        let report = validate_config(&config, &self.registry, &self.resources);
        serde_json::to_value(&report).map_err(|e| PolicyError::Serialization(e.to_string()))
    }

    async fn handle_tool_event(&self, payload: &Value) -> PolicyResult<Value> {
        let policy_id = parse_policy_id(payload)?;
        let user = parse_user(payload)?;
        let data = payload.get("data").cloned().unwrap_or(Value::Null);

        let instance = self
            .instance(&policy_id)
            .await
            .ok_or(PolicyError::PolicyNotFound(policy_id))?;
        let delivered = instance.receive_external(&user, data).await?;
        Ok(json!({ "delivered": delivered }))
    }
}

async fn deliver_forwarded(instance: &Arc<PolicyInstance>, payload: &Value) -> PolicyResult<()> {
    let target = payload
        .get("target")
        .and_then(Value::as_str)
        .ok_or_else(|| PolicyError::Transport("missing 'target'".to_string()))?;
    let input = serde_json::from_value(
        payload
            .get("input")
            .cloned()
            .ok_or_else(|| PolicyError::Transport("missing 'input'".to_string()))?,
    )
    .map_err(|e| PolicyError::Serialization(e.to_string()))?;
    let user = parse_user(payload)?;
    let data = payload.get("data").cloned().unwrap_or(Value::Null);

    instance
        .deliver_remote(&BlockTag::new(target), input, &user, data)
        .await
}

fn parse_policy_id(payload: &Value) -> PolicyResult<PolicyId> {
    payload
        .get("policyId")
        .and_then(Value::as_str)
        .map(PolicyId::new)
        .ok_or_else(|| PolicyError::Transport("missing 'policyId'".to_string()))
}

fn parse_user(payload: &Value) -> PolicyResult<PolicyUser> {
    serde_json::from_value(
        payload
            .get("user")
            .cloned()
            .ok_or_else(|| PolicyError::Transport("missing 'user'".to_string()))?,
    )
    .map_err(|e| PolicyError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PolicyContext;
    use policy_actions::InMemoryActionStore;
    use policy_storage::InMemoryPolicyStorage;
    use policy_transport::InMemoryTransport;
    use std::time::Duration;

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

    async fn make_service() -> (Arc<PolicyEngineService>, Arc<InMemoryTransport>) {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(BlockRegistry::standard());
        let service = PolicyEngineService::with_resources(
            transport.clone() as Arc<dyn MessageTransport>,
            registry,
            ValidationResources::new().with_schema("iri:demo"),
        );
        service.start().await.unwrap();
        (service, transport)
    }

    async fn register_demo_policy(
        service: &Arc<PolicyEngineService>,
        transport: &Arc<InMemoryTransport>,
    ) -> PolicyId {
        let policy_id = PolicyId::new("p-1");
        let context = PolicyContext::new(
            policy_id.clone(),
            "did:aegis:owner",
            Arc::new(InMemoryPolicyStorage::new()),
            transport.clone() as Arc<dyn MessageTransport>,
            Arc::new(InMemoryActionStore::new()),
        );
        let config = BlockConfig::new("interfaceContainerBlock")
            .with_tag("root")
            .with_child(
                BlockConfig::new("requestDocumentBlock")
                    .with_tag("request")
                    .with_options(json!({"schema": "iri:demo"})),
            )
            .with_child(BlockConfig::new("externalDataBlock").with_tag("intake"));
        let instance =
            PolicyInstance::build(&config, context, Arc::new(BlockRegistry::standard())).unwrap();
        service.register_instance(instance).await.unwrap();
        policy_id
    }

    fn demo_user() -> Value {
        json!({
            "did": "did:aegis:alice",
            "username": "alice",
            "account_id": "0.0.100",
        })
    }

    #[tokio::test]
    async fn ready_notification_on_register() {
        let (service, transport) = make_service().await;
        let mut rx = transport
            .subscribe(&topics::policy_ready(&PolicyId::new("p-1")))
            .await
            .unwrap();
        register_demo_policy(&service, &transport).await;
        let message = rx.recv().await.unwrap();
        assert_eq!(message.payload["policyId"], json!("p-1"));
    }

    #[tokio::test]
    async fn block_about_lists_registered_types() {
        let (_service, transport) = make_service().await;
        let about = transport
            .request(topics::GET_BLOCK_ABOUT, json!({}), REQUEST_TIMEOUT)
            .await
            .unwrap();
        assert!(about.get("tokenActionBlock").is_some());
    }

    #[tokio::test]
    async fn validate_policy_reports_failures() {
        let (_service, transport) = make_service().await;
        let payload = json!({
            "policy": {
                "blockType": "interfaceContainerBlock",
                "tag": "root",
                "children": [{
                    "blockType": "requestDocumentBlock",
                    "tag": "req",
                    "options": {"schema": "iri:ghost"}
                }]
            }
        });
        let report = transport
            .request(topics::VALIDATE_POLICY, payload, REQUEST_TIMEOUT)
            .await
            .unwrap();
        let failures = report["failures"].as_array().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0]["message"]
            .as_str()
            .unwrap()
            .contains("iri:ghost"));
    }

    #[tokio::test]
    async fn dry_run_answers_with_block_output() {
        let (service, transport) = make_service().await;
        register_demo_policy(&service, &transport).await;

        let reply = transport
            .request(
                topics::DRY_RUN_BLOCK,
                json!({
                    "policyId": "p-1",
                    "block": "request",
                    "user": demo_user(),
                    "data": {"field": 9},
                }),
                REQUEST_TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(reply["data"]["document"]["field"], json!(9));
    }

    #[tokio::test]
    async fn tool_event_reaches_intake_blocks() {
        let (service, transport) = make_service().await;
        register_demo_policy(&service, &transport).await;

        let reply = transport
            .request(
                topics::TOOL_EVENT,
                json!({
                    "policyId": "p-1",
                    "user": demo_user(),
                    "data": {"reading": 1},
                }),
                REQUEST_TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(reply["delivered"], json!(1));
    }

    #[tokio::test]
    async fn forwarded_events_cross_instances() {
        use policy_storage::{DocumentFilter, DocumentStore};
        use policy_types::{BlockTag, EventConfig, InputEvent, OutputEvent};

        let (service, transport) = make_service().await;

        // p-2 hosts the sink block
        let sink_storage = Arc::new(InMemoryPolicyStorage::new());
        let sink_context = PolicyContext::new(
            PolicyId::new("p-2"),
            "did:aegis:owner",
            sink_storage.clone(),
            transport.clone() as Arc<dyn MessageTransport>,
            Arc::new(InMemoryActionStore::new()),
        );
        let sink_config = BlockConfig::new("interfaceContainerBlock")
            .with_tag("root")
            .with_child(BlockConfig::new("sendDocumentBlock").with_tag("sink"));
        service
            .register_instance(
                PolicyInstance::build(&sink_config, sink_context, Arc::new(BlockRegistry::standard()))
                    .unwrap(),
            )
            .await
            .unwrap();

        // p-1 declares 'sink' as a remote tag and links to it
        let source_context = PolicyContext::new(
            PolicyId::new("p-1"),
            "did:aegis:owner",
            Arc::new(InMemoryPolicyStorage::new()),
            transport.clone() as Arc<dyn MessageTransport>,
            Arc::new(InMemoryActionStore::new()),
        )
        .with_remote_tags(
            [(BlockTag::new("sink"), PolicyId::new("p-2"))]
                .into_iter()
                .collect(),
        );
        let source_config = BlockConfig::new("interfaceContainerBlock")
            .with_tag("root")
            .with_event(EventConfig::new(
                "root",
                OutputEvent::RunEvent,
                "sink",
                InputEvent::RunEvent,
            ));
        let source = service
            .register_instance(
                PolicyInstance::build(
                    &source_config,
                    source_context,
                    Arc::new(BlockRegistry::standard()),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let user: PolicyUser = serde_json::from_value(demo_user()).unwrap();
        let step = source.new_step();
        step.begin();
        source
            .trigger(
                &BlockTag::new("root"),
                policy_types::OutputEvent::RunEvent,
                &user,
                json!({"document": {"v": 1}}),
                &step,
            )
            .await
            .unwrap();
        step.end();

        // The forwarded event lands in p-2's store once its listener runs
        let mut rows = Vec::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            rows = sink_storage
                .find(DocumentFilter::for_policy(PolicyId::new("p-2")))
                .await
                .unwrap();
            if !rows.is_empty() {
                break;
            }
        }
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].document["v"], json!(1));
    }

    #[tokio::test]
    async fn malformed_requests_get_error_replies() {
        let (_service, transport) = make_service().await;
        let reply = transport
            .request(topics::DRY_RUN_BLOCK, json!({"nonsense": true}), REQUEST_TIMEOUT)
            .await
            .unwrap();
        assert!(reply["error"].as_str().unwrap().contains("policyId"));
    }

    #[tokio::test]
    async fn unknown_policy_is_an_error_reply() {
        let (_service, transport) = make_service().await;
        let reply = transport
            .request(
                topics::TOOL_EVENT,
                json!({"policyId": "ghost", "user": demo_user(), "data": {}}),
                REQUEST_TIMEOUT,
            )
            .await
            .unwrap();
        assert!(reply["error"].as_str().unwrap().contains("ghost"));
    }
}
