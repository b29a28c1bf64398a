//! Derivation block: computes an output field over incoming documents. The
//! computation runs on the transform pool, never on the event path.

use crate::block::{BlockContext, BlockHandler, BlockOptions, BlockOutput};
use crate::registry::{parse_options_as, BlockAbout, BlockDescriptor};
use crate::tree::BlockNode;
use crate::validator::ValidatorContext;
use async_trait::async_trait;
use policy_types::{InputEvent, OutputEvent, PolicyResult, PolicyUser};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const BLOCK_TYPE: &str = "calculateBlock";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalculateOp {
    Sum,
    Average,
    #[default]
    Count,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CalculateOptions {
    #[serde(default)]
    pub op: CalculateOp,
    /// Document field the operation reads; unused for Count
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub output_field: String,
}

pub struct CalculateBlock;

fn input_documents(data: &Value) -> Vec<Value> {
    match data.get("documents").and_then(Value::as_array) {
        Some(items) => items.clone(),
        None => vec![data.clone()],
    }
}

fn field_value(document: &Value, field: &str) -> Option<f64> {
    document
        .get("document")
        .unwrap_or(document)
        .get(field)
        .and_then(Value::as_f64)
}

#[async_trait]
impl BlockHandler for CalculateBlock {
    fn block_type(&self) -> &'static str {
        BLOCK_TYPE
    }

    async fn handle_event(
        &self,
        ctx: &BlockContext<'_>,
        _user: &PolicyUser,
        event: InputEvent,
        data: Value,
    ) -> PolicyResult<BlockOutput> {
        if event != InputEvent::RunEvent {
            return Ok(BlockOutput::empty());
        }

        let options = match ctx.options() {
            BlockOptions::Calculate(options) => options.clone(),
            _ => CalculateOptions::default(),
        };

        let op = options.op;
        let field = options.field.clone();
        let result = ctx
            .policy
            .transforms
            .submit(
                data,
                Box::new(move |input| {
                    let documents = input_documents(&input);
                    let values = documents
                        .iter()
                        .filter_map(|doc| field_value(doc, &field))
                        .collect::<Vec<_>>();
                    let computed = match op {
                        CalculateOp::Count => documents.len() as f64,
                        CalculateOp::Sum => values.iter().sum(),
                        CalculateOp::Average => {
                            if values.is_empty() {
                                return Err(format!("no values for field '{field}'"));
                            }
                            values.iter().sum::<f64>() / values.len() as f64
                        }
                    };
                    Ok(serde_json::json!(computed))
                }),
            )
            .await
            .map_err(|err| ctx.action_error(err.to_string()))?;

        let mut payload = serde_json::Map::new();
        payload.insert(options.output_field.clone(), result);
        let payload = Value::Object(payload);
        Ok(BlockOutput::data(payload.clone()).with_emit(OutputEvent::RunEvent, payload))
    }

    fn validate(&self, node: &BlockNode, ctx: &mut ValidatorContext<'_>) {
        let BlockOptions::Calculate(options) = &node.options else {
            return;
        };
        if options.output_field.is_empty() {
            ctx.error("an output field is required");
        }
        if options.op != CalculateOp::Count {
            if options.field.is_empty() {
                ctx.error("a source field is required");
            } else if !ctx.variable_path_exists(&options.field) {
                ctx.error(format!("unknown variable path '{}'", options.field));
            }
        }
    }
}

pub fn descriptor() -> BlockDescriptor {
    BlockDescriptor {
        about: BlockAbout {
            block_type: BLOCK_TYPE,
            label: "Calculate",
            capabilities: &["validate"],
        },
        handler: Arc::new(CalculateBlock),
        parse_options: |value| Ok(BlockOptions::Calculate(parse_options_as(value)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_extraction_handles_wrapped_documents() {
        let wrapped = json!({"document": {"amount": 5.0}});
        let bare = json!({"amount": 7.0});
        assert_eq!(field_value(&wrapped, "amount"), Some(5.0));
        assert_eq!(field_value(&bare, "amount"), Some(7.0));
        assert_eq!(field_value(&bare, "missing"), None);
    }

    #[test]
    fn test_input_documents_unwraps_batches() {
        let batch = json!({"documents": [1, 2]});
        assert_eq!(input_documents(&batch).len(), 2);
        let single = json!({"amount": 1});
        assert_eq!(input_documents(&single).len(), 1);
    }
}
