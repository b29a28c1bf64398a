//! Document intake block: accepts a user submission shaped by a schema and
//! hands it to the graph.

use crate::block::{BlockContext, BlockHandler, BlockOptions, BlockOutput};
use crate::registry::{parse_options_as, BlockAbout, BlockDescriptor};
use crate::tree::BlockNode;
use crate::validator::ValidatorContext;
use async_trait::async_trait;
use policy_storage::{DocumentFilter, DocumentKind, DocumentRecord};
use policy_types::{OutputEvent, PolicyResult, PolicyUser};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const BLOCK_TYPE: &str = "requestDocumentBlock";

const LAST_SUBMISSION_KEY: &str = "last_submission";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestDocumentOptions {
    /// Schema IRI the submission must conform to
    #[serde(default)]
    pub schema: String,
}

pub struct RequestDocumentBlock;

#[async_trait]
impl BlockHandler for RequestDocumentBlock {
    fn block_type(&self) -> &'static str {
        BLOCK_TYPE
    }

    async fn get_data(
        &self,
        ctx: &BlockContext<'_>,
        user: &PolicyUser,
    ) -> PolicyResult<serde_json::Value> {
        let schema = match ctx.options() {
            BlockOptions::RequestDocument(options) => options.schema.clone(),
            _ => String::new(),
        };
        let last: Option<serde_json::Value> =
            ctx.cache().get_cache(LAST_SUBMISSION_KEY, Some(user)).await?;
        Ok(serde_json::json!({
            "schema": schema,
            "last": last,
        }))
    }

    async fn set_data(
        &self,
        ctx: &BlockContext<'_>,
        user: &PolicyUser,
        data: serde_json::Value,
    ) -> PolicyResult<BlockOutput> {
        if !data.is_object() {
            return Err(ctx.action_error("submission must be an object"));
        }

        let record = ctx
            .policy
            .documents
            .save(DocumentRecord::new(
                ctx.policy.policy_id.clone(),
                user.did.clone(),
                DocumentKind::Credential,
                data.clone(),
            ))
            .await?;

        ctx.cache()
            .set_cache(LAST_SUBMISSION_KEY, &data, Some(user))
            .await?;

        let payload = serde_json::json!({
            "id": record.id,
            "owner": record.owner,
            "document": record.document,
        });
        Ok(BlockOutput::data(payload.clone()).with_emit(OutputEvent::RunEvent, payload))
    }

    async fn get_from_source(
        &self,
        ctx: &BlockContext<'_>,
        user: &PolicyUser,
        _filter: serde_json::Value,
    ) -> PolicyResult<Vec<serde_json::Value>> {
        let records = ctx
            .policy
            .documents
            .find(
                DocumentFilter::for_policy(ctx.policy.policy_id.clone())
                    .kind(DocumentKind::Credential)
                    .owner(user.did.clone()),
            )
            .await?;
        Ok(records
            .into_iter()
            .map(|record| {
                serde_json::json!({
                    "id": record.id,
                    "document": record.document,
                })
            })
            .collect())
    }

    fn validate(&self, node: &BlockNode, ctx: &mut ValidatorContext<'_>) {
        let BlockOptions::RequestDocument(options) = &node.options else {
            return;
        };
        if options.schema.is_empty() {
            ctx.error("a schema reference is required");
        } else if !ctx.schema_exists(&options.schema) {
            ctx.error(format!("schema '{}' does not exist", options.schema));
        }
    }
}

pub fn descriptor() -> BlockDescriptor {
    BlockDescriptor {
        about: BlockAbout {
            block_type: BLOCK_TYPE,
            label: "Request Document",
            capabilities: &["getData", "setData", "getFromSource", "validate"],
        },
        handler: Arc::new(RequestDocumentBlock),
        parse_options: |value| Ok(BlockOptions::RequestDocument(parse_options_as(value)?)),
    }
}
