//! External intake block: the entry point for data pushed in from outside
//! the policy (sensors, integrations, tool events).

use crate::block::{BlockContext, BlockHandler, BlockOptions, BlockOutput};
use crate::registry::{parse_options_as, BlockAbout, BlockDescriptor};
use crate::tree::BlockNode;
use crate::validator::ValidatorContext;
use async_trait::async_trait;
use policy_storage::{DocumentKind, DocumentRecord};
use policy_types::{OutputEvent, PolicyResult, PolicyUser};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const BLOCK_TYPE: &str = "externalDataBlock";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExternalDataOptions {
    /// Optional schema the pushed data is expected to conform to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

pub struct ExternalDataBlock;

#[async_trait]
impl BlockHandler for ExternalDataBlock {
    fn block_type(&self) -> &'static str {
        BLOCK_TYPE
    }

    async fn set_data(
        &self,
        ctx: &BlockContext<'_>,
        user: &PolicyUser,
        data: serde_json::Value,
    ) -> PolicyResult<BlockOutput> {
        let record = ctx
            .policy
            .documents
            .save(DocumentRecord::new(
                ctx.policy.policy_id.clone(),
                user.did.clone(),
                DocumentKind::External,
                data,
            ))
            .await?;

        tracing::debug!(
            policy_id = %ctx.policy.policy_id,
            block = %ctx.node.tag,
            row_id = %record.id,
            "External data received"
        );

        let payload = serde_json::json!({
            "id": record.id,
            "owner": record.owner,
            "document": record.document,
        });
        Ok(BlockOutput::data(payload.clone()).with_emit(OutputEvent::RunEvent, payload))
    }

    fn validate(&self, node: &BlockNode, ctx: &mut ValidatorContext<'_>) {
        let BlockOptions::ExternalData(options) = &node.options else {
            return;
        };
        if let Some(schema) = &options.schema {
            if !ctx.schema_exists(schema) {
                ctx.error(format!("schema '{schema}' does not exist"));
            }
        }
    }
}

pub fn descriptor() -> BlockDescriptor {
    BlockDescriptor {
        about: BlockAbout {
            block_type: BLOCK_TYPE,
            label: "External Data",
            capabilities: &["setData", "validate"],
        },
        handler: Arc::new(ExternalDataBlock),
        parse_options: |value| Ok(BlockOptions::ExternalData(parse_options_as(value)?)),
    }
}
