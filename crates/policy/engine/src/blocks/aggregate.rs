//! Aggregation block: collects incoming documents per user and releases
//! them as one batch once the threshold is reached.

use crate::block::{BlockContext, BlockHandler, BlockOptions, BlockOutput};
use crate::registry::{parse_options_as, BlockAbout, BlockDescriptor};
use crate::tree::BlockNode;
use crate::validator::ValidatorContext;
use async_trait::async_trait;
use policy_types::{InputEvent, OutputEvent, PolicyResult, PolicyUser};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const BLOCK_TYPE: &str = "aggregateDocumentBlock";

const BATCH_KEY: &str = "batch";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregateOptions {
    #[serde(default = "default_threshold")]
    pub threshold: usize,
}

fn default_threshold() -> usize {
    1
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

pub struct AggregateDocumentBlock;

#[async_trait]
impl BlockHandler for AggregateDocumentBlock {
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

        let threshold = match ctx.options() {
            BlockOptions::Aggregate(options) => options.threshold.max(1),
            _ => 1,
        };

        let cache = ctx.cache();
        let mut batch: Vec<serde_json::Value> = cache
            .get_cache(BATCH_KEY, Some(user))
            .await?
            .unwrap_or_default();
        batch.push(data);

        if batch.len() < threshold {
            cache.set_cache(BATCH_KEY, &batch, Some(user)).await?;
            return Ok(BlockOutput::data(serde_json::json!({
                "held": batch.len(),
                "threshold": threshold,
            })));
        }

        // Threshold reached: release and reset
        cache
            .set_cache(BATCH_KEY, &Vec::<serde_json::Value>::new(), Some(user))
            .await?;
        let payload = serde_json::json!({ "documents": batch });
        Ok(BlockOutput::data(payload.clone()).with_emit(OutputEvent::RunEvent, payload))
    }

    fn validate(&self, node: &BlockNode, ctx: &mut ValidatorContext<'_>) {
        let BlockOptions::Aggregate(options) = &node.options else {
            return;
        };
        if options.threshold == 0 {
            ctx.error("threshold must be at least 1");
        }
    }
}

pub fn descriptor() -> BlockDescriptor {
    BlockDescriptor {
        about: BlockAbout {
            block_type: BLOCK_TYPE,
            label: "Aggregate Documents",
            capabilities: &["validate"],
        },
        handler: Arc::new(AggregateDocumentBlock),
        parse_options: |value| Ok(BlockOptions::Aggregate(parse_options_as(value)?)),
    }
}
