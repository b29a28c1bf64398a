//! Structural container block: groups children for rendering, no behavior
//! of its own.

use crate::block::{BlockContext, BlockHandler, BlockOptions};
use crate::registry::{parse_options_as, BlockAbout, BlockDescriptor};
use async_trait::async_trait;
use policy_types::{PolicyResult, PolicyUser};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const BLOCK_TYPE: &str = "interfaceContainerBlock";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContainerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

pub struct InterfaceContainerBlock;

#[async_trait]
impl BlockHandler for InterfaceContainerBlock {
    fn block_type(&self) -> &'static str {
        BLOCK_TYPE
    }

    async fn get_data(
        &self,
        ctx: &BlockContext<'_>,
        _user: &PolicyUser,
    ) -> PolicyResult<serde_json::Value> {
        let title = match ctx.options() {
            BlockOptions::Container(options) => options.title.clone(),
            _ => None,
        };
        let children = ctx
            .node
            .children
            .iter()
            .map(|&index| ctx.tree.node(index).tag.to_string())
            .collect::<Vec<_>>();
        Ok(serde_json::json!({
            "id": ctx.node.id,
            "blockType": BLOCK_TYPE,
            "tag": ctx.node.tag,
            "title": title,
            "children": children,
        }))
    }
}

pub fn descriptor() -> BlockDescriptor {
    BlockDescriptor {
        about: BlockAbout {
            block_type: BLOCK_TYPE,
            label: "Container",
            capabilities: &["getData"],
        },
        handler: Arc::new(InterfaceContainerBlock),
        parse_options: |value| Ok(BlockOptions::Container(parse_options_as(value)?)),
    }
}
