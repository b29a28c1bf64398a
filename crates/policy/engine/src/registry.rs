//! Explicit block type registry.
//!
//! Block types are registered in a plain table at process init, no
//! annotation scanning. The registry owns one shared handler per type plus
//! the options parser that turns the raw config bag into typed options.

use crate::block::{BlockHandler, BlockOptions};
use policy_types::{PolicyError, PolicyResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static description of a block type, served for editor tooling.
#[derive(Clone, Debug)]
pub struct BlockAbout {
    pub block_type: &'static str,
    pub label: &'static str,
    /// Which of the capability set the type implements
    pub capabilities: &'static [&'static str],
}

/// Everything the engine knows about one block type.
pub struct BlockDescriptor {
    pub about: BlockAbout,
    pub handler: Arc<dyn BlockHandler>,
    pub parse_options: fn(&Value) -> PolicyResult<BlockOptions>,
}

/// The block type table.
#[derive(Default)]
pub struct BlockRegistry {
    by_type: BTreeMap<String, BlockDescriptor>,
}

impl BlockRegistry {
    /// An empty registry; callers register their own types.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard block set.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for descriptor in crate::blocks::standard_descriptors() {
            registry.register(descriptor);
        }
        registry
    }

    pub fn register(&mut self, descriptor: BlockDescriptor) {
        self.by_type
            .insert(descriptor.about.block_type.to_string(), descriptor);
    }

    pub fn get(&self, block_type: &str) -> Option<&BlockDescriptor> {
        self.by_type.get(block_type)
    }

    pub fn contains(&self, block_type: &str) -> bool {
        self.by_type.contains_key(block_type)
    }

    pub fn handler(&self, block_type: &str) -> PolicyResult<Arc<dyn BlockHandler>> {
        self.by_type
            .get(block_type)
            .map(|d| d.handler.clone())
            .ok_or_else(|| PolicyError::UnknownBlockType(block_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// The full about table, keyed by block type.
    pub fn about(&self) -> Value {
        let mut about = serde_json::Map::new();
        for (block_type, descriptor) in &self.by_type {
            about.insert(
                block_type.clone(),
                serde_json::json!({
                    "label": descriptor.about.label,
                    "capabilities": descriptor.about.capabilities,
                }),
            );
        }
        Value::Object(about)
    }
}

/// Parse a raw options bag into a typed struct; a missing or null bag means
/// defaults.
pub fn parse_options_as<T>(value: &Value) -> PolicyResult<T>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| PolicyError::Serialization(e.to_string()))
}
