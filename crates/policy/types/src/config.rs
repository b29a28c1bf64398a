//! Persisted block configuration format.
//!
//! A policy is stored as a nested JSON tree of `{ blockType, tag, uuid,
//! options, children, events }` objects. Unknown fields are preserved (not
//! rejected) for forward compatibility; an unknown `blockType` is a hard
//! build error, never silently skipped.

use crate::{BlockId, BlockTag, EventActor, InputEvent, OutputEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One node of the persisted configuration tree
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockConfig {
    /// Registered block type name
    pub block_type: String,
    /// Stable tag; generated by the builder when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<BlockTag>,
    /// Instance uuid; regenerated on import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<BlockId>,
    /// Block-type-specific options, parsed into a typed form at build time
    #[serde(default)]
    pub options: serde_json::Value,
    /// Nested child blocks, in execution order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BlockConfig>,
    /// Event links declared on this node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventConfig>,
    /// Fields this engine version does not understand; carried, not dropped
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl BlockConfig {
    pub fn new(block_type: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            tag: None,
            uuid: None,
            options: serde_json::Value::Null,
            children: Vec::new(),
            events: Vec::new(),
            extra: HashMap::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(BlockTag::new(tag));
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(BlockId::new(uuid));
        self
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    pub fn with_child(mut self, child: BlockConfig) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_event(mut self, event: EventConfig) -> Self {
        self.events.push(event);
        self
    }

    /// Total number of nodes in this subtree, including self
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(BlockConfig::node_count).sum::<usize>()
    }
}

/// A persisted event link between two blocks.
///
/// Immutable once built; only `disabled` is runtime-toggleable.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConfig {
    /// Tag of the emitting block
    pub source: BlockTag,
    /// Tag of the receiving block
    pub target: BlockTag,
    /// Event consumed on the target side
    pub input: InputEvent,
    /// Event produced on the source side
    pub output: OutputEvent,
    /// Disabled links are kept in the table but never fire
    #[serde(default)]
    pub disabled: bool,
    /// Identity the event is delivered under
    #[serde(default)]
    pub actor: EventActor,
}

impl EventConfig {
    pub fn new(
        source: impl Into<String>,
        output: OutputEvent,
        target: impl Into<String>,
        input: InputEvent,
    ) -> Self {
        Self {
            source: BlockTag::new(source),
            target: BlockTag::new(target),
            input,
            output,
            disabled: false,
            actor: EventActor::default(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn with_actor(mut self, actor: EventActor) -> Self {
        self.actor = actor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_are_preserved() {
        let raw = json!({
            "blockType": "interfaceContainerBlock",
            "tag": "root",
            "futureField": {"nested": true},
            "children": []
        });
        let config: BlockConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.block_type, "interfaceContainerBlock");
        assert!(config.extra.contains_key("futureField"));

        // And round-trip back out unchanged
        let out = serde_json::to_value(&config).unwrap();
        assert_eq!(out["futureField"]["nested"], json!(true));
    }

    #[test]
    fn test_nested_tree_parses() {
        let raw = json!({
            "blockType": "interfaceContainerBlock",
            "tag": "root",
            "children": [
                {"blockType": "policyRolesBlock", "tag": "roles"},
                {
                    "blockType": "interfaceContainerBlock",
                    "tag": "inner",
                    "children": [{"blockType": "requestDocumentBlock", "tag": "req"}]
                }
            ]
        });
        let config: BlockConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.node_count(), 4);
        assert_eq!(config.children[1].children[0].block_type, "requestDocumentBlock");
    }

    #[test]
    fn test_event_config_defaults() {
        let raw = json!({
            "source": "a",
            "target": "b",
            "input": "RunEvent",
            "output": "RunEvent"
        });
        let event: EventConfig = serde_json::from_value(raw).unwrap();
        assert!(!event.disabled);
        assert_eq!(event.actor, EventActor::EventInitiator);
    }

    #[test]
    fn test_builder_shape() {
        let config = BlockConfig::new("interfaceContainerBlock")
            .with_tag("root")
            .with_child(BlockConfig::new("requestDocumentBlock").with_tag("req"))
            .with_event(EventConfig::new(
                "req",
                OutputEvent::RunEvent,
                "root",
                InputEvent::RefreshEvent,
            ));
        assert_eq!(config.node_count(), 2);
        assert_eq!(config.events.len(), 1);
    }
}
