//! Persistence block: writes the document carried by an incoming event to
//! the policy's document store and passes it on.

use crate::block::{BlockContext, BlockHandler, BlockOptions, BlockOutput};
use crate::registry::{parse_options_as, BlockAbout, BlockDescriptor};
use async_trait::async_trait;
use policy_storage::{DocumentKind, DocumentRecord};
use policy_types::{InputEvent, OutputEvent, PolicyResult, PolicyUser};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const BLOCK_TYPE: &str = "sendDocumentBlock";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendDocumentOptions {
    /// Collection the document lands in
    #[serde(default = "default_kind")]
    pub kind: DocumentKind,
}

fn default_kind() -> DocumentKind {
    DocumentKind::Credential
}

impl Default for SendDocumentOptions {
    fn default() -> Self {
        Self {
            kind: default_kind(),
        }
    }
}

pub struct SendDocumentBlock;

#[async_trait]
impl BlockHandler for SendDocumentBlock {
    fn block_type(&self) -> &'static str {
        BLOCK_TYPE
    }

    async fn handle_event(
        &self,
        ctx: &BlockContext<'_>,
        user: &PolicyUser,
        event: InputEvent,
        data: serde_json::Value,
    ) -> PolicyResult<BlockOutput> {
        if event != InputEvent::RunEvent {
            return Ok(BlockOutput::empty());
        }

        let kind = match ctx.options() {
            BlockOptions::SendDocument(options) => options.kind,
            _ => DocumentKind::Credential,
        };
        let document = data.get("document").cloned().unwrap_or_else(|| data.clone());
        let record = ctx
            .policy
            .documents
            .save(DocumentRecord::new(
                ctx.policy.policy_id.clone(),
                user.did.clone(),
                kind,
                document,
            ))
            .await?;

        tracing::debug!(
            policy_id = %ctx.policy.policy_id,
            block = %ctx.node.tag,
            row_id = %record.id,
            "Document stored"
        );

        let payload = serde_json::json!({
            "id": record.id,
            "owner": record.owner,
            "document": record.document,
        });
        Ok(BlockOutput::data(payload.clone()).with_emit(OutputEvent::RunEvent, payload))
    }
}

pub fn descriptor() -> BlockDescriptor {
    BlockDescriptor {
        about: BlockAbout {
            block_type: BLOCK_TYPE,
            label: "Send Document",
            capabilities: &[],
        },
        handler: Arc::new(SendDocumentBlock),
        parse_options: |value| Ok(BlockOptions::SendDocument(parse_options_as(value)?)),
    }
}
