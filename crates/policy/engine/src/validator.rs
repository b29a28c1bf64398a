//! Tree validation.
//!
//! Traversal is depth-first pre-order. A failing block never stops its
//! siblings: findings accumulate in a shared report keyed by block id. Block
//! types without registered rules are valid by default; older
//! configurations depend on that.

use crate::registry::BlockRegistry;
use crate::tree::{PolicyTree, TreeBuilder};
use policy_types::{BlockConfig, BlockId, BlockTag, ValidationFailure};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What the schema and token layers expose to validation.
#[derive(Clone, Debug, Default)]
pub struct ValidationResources {
    pub schemas: HashSet<String>,
    pub token_templates: HashSet<String>,
    /// Known document variable paths; empty means the layer provided none
    /// and path checks stay permissive
    pub variables: HashSet<String>,
}

impl ValidationResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, iri: impl Into<String>) -> Self {
        self.schemas.insert(iri.into());
        self
    }

    pub fn with_token_template(mut self, name: impl Into<String>) -> Self {
        self.token_templates.insert(name.into());
        self
    }

    pub fn with_variable(mut self, path: impl Into<String>) -> Self {
        self.variables.insert(path.into());
        self
    }
}

/// The accumulated validation result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    pub fn for_block(&self, block_id: &BlockId) -> Vec<&ValidationFailure> {
        self.failures
            .iter()
            .filter(|f| &f.block_id == block_id)
            .collect()
    }

    pub fn push(&mut self, failure: ValidationFailure) {
        self.failures.push(failure);
    }
}

/// Read-only utilities handed to per-type rules, plus the shared failure
/// container.
pub struct ValidatorContext<'a> {
    resources: &'a ValidationResources,
    tree: &'a PolicyTree,
    current_id: BlockId,
    current_type: String,
    report: ValidationReport,
}

impl<'a> ValidatorContext<'a> {
    fn new(resources: &'a ValidationResources, tree: &'a PolicyTree) -> Self {
        Self {
            resources,
            tree,
            current_id: BlockId::new(""),
            current_type: String::new(),
            report: ValidationReport::default(),
        }
    }

    /// Record a finding against the block currently being validated.
    pub fn error(&mut self, message: impl Into<String>) {
        self.report.push(ValidationFailure::new(
            self.current_id.clone(),
            self.current_type.clone(),
            message,
        ));
    }

    pub fn schema_exists(&self, iri: &str) -> bool {
        self.resources.schemas.contains(iri)
    }

    pub fn token_template_exists(&self, name: &str) -> bool {
        self.resources.token_templates.contains(name)
    }

    /// Permissive when the schema layer supplied no variable table.
    pub fn variable_path_exists(&self, path: &str) -> bool {
        self.resources.variables.is_empty() || self.resources.variables.contains(path)
    }

    pub fn tag_count(&self, tag: &BlockTag) -> usize {
        self.tree.tag_count(tag)
    }
}

/// Validate a built tree. Deterministic: the same tree and resources always
/// produce the same report.
pub fn validate(
    tree: &PolicyTree,
    registry: &BlockRegistry,
    resources: &ValidationResources,
) -> ValidationReport {
    let mut ctx = ValidatorContext::new(resources, tree);

    for index in tree.pre_order() {
        let node = tree.node(index);
        ctx.current_id = node.id.clone();
        ctx.current_type = node.block_type.clone();
        match registry.get(&node.block_type) {
            Some(descriptor) => descriptor.handler.validate(node, &mut ctx),
            // The builder rejects unknown types; a hand-assembled tree
            // still gets a finding instead of a panic
            None => ctx.error(format!("unknown block type '{}'", node.block_type)),
        }
    }

    ctx.report
}

/// Validate a raw configuration: build it, then validate the tree. A build
/// failure becomes a report entry instead of aborting the caller.
pub fn validate_config(
    config: &BlockConfig,
    registry: &BlockRegistry,
    resources: &ValidationResources,
) -> ValidationReport {
    match TreeBuilder::new(registry).build(config) {
        Ok((tree, _)) => validate(&tree, registry, resources),
        Err(err) => {
            let mut report = ValidationReport::default();
            report.push(ValidationFailure::new(
                config.uuid.clone().unwrap_or_else(|| BlockId::new("root")),
                config.block_type.clone(),
                err.to_string(),
            ));
            report
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_types::{BlockConfig, EventConfig, InputEvent, OutputEvent};
    use serde_json::json;

    fn make_registry() -> BlockRegistry {
        BlockRegistry::standard()
    }

    fn make_resources() -> ValidationResources {
        ValidationResources::new().with_schema("iri:demo")
    }

    #[test]
    fn test_valid_config_passes() {
        let config = BlockConfig::new("interfaceContainerBlock")
            .with_tag("root")
            .with_child(
                BlockConfig::new("requestDocumentBlock")
                    .with_tag("req")
                    .with_options(json!({"schema": "iri:demo"})),
            );
        let report = validate_config(&config, &make_registry(), &make_resources());
        assert!(report.is_valid(), "{:?}", report.failures());
    }

    #[test]
    fn test_failures_accumulate_across_siblings() {
        let config = BlockConfig::new("interfaceContainerBlock")
            .with_tag("root")
            .with_child(
                BlockConfig::new("requestDocumentBlock")
                    .with_tag("bad-schema")
                    .with_uuid("id-1")
                    .with_options(json!({"schema": "iri:ghost"})),
            )
            .with_child(
                BlockConfig::new("policyRolesBlock")
                    .with_tag("no-roles")
                    .with_uuid("id-2")
                    .with_options(json!({"roles": []})),
            )
            .with_child(
                BlockConfig::new("requestDocumentBlock")
                    .with_tag("fine")
                    .with_options(json!({"schema": "iri:demo"})),
            );

        let report = validate_config(&config, &make_registry(), &make_resources());
        assert_eq!(report.failures().len(), 2);
        assert_eq!(report.for_block(&BlockId::new("id-1")).len(), 1);
        assert_eq!(report.for_block(&BlockId::new("id-2")).len(), 1);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let config = BlockConfig::new("interfaceContainerBlock")
            .with_tag("root")
            .with_child(
                BlockConfig::new("requestDocumentBlock")
                    .with_tag("bad")
                    .with_uuid("id-1")
                    .with_options(json!({"schema": "iri:ghost"})),
            );

        let registry = make_registry();
        let resources = make_resources();
        let first = validate_config(&config, &registry, &resources);
        let second = validate_config(&config, &registry, &resources);
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn test_build_failure_becomes_a_finding() {
        let config = BlockConfig::new("interfaceContainerBlock")
            .with_tag("root")
            .with_event(EventConfig::new(
                "root",
                OutputEvent::RunEvent,
                "ghost",
                InputEvent::RunEvent,
            ));
        let report = validate_config(&config, &make_registry(), &make_resources());
        assert!(!report.is_valid());
        assert!(report.failures()[0].message.contains("ghost"));
    }
}
