//! Ledger token block: association and dissociation go through the
//! two-phase action protocol, because the signing wallet lives with an
//! external actor.

use crate::block::{BlockContext, BlockHandler, BlockOptions, BlockOutput};
use crate::registry::{parse_options_as, BlockAbout, BlockDescriptor};
use crate::tree::BlockNode;
use crate::validator::ValidatorContext;
use async_trait::async_trait;
use policy_actions::{ActionDocument, ActionRecord, ActionStatus};
use policy_types::{InputEvent, OutputEvent, PolicyResult, PolicyUser};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const BLOCK_TYPE: &str = "tokenActionBlock";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenActionKind {
    #[default]
    Associate,
    Dissociate,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenActionOptions {
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub action: TokenActionKind,
    /// Wallet the dissociation applies to; required for dissociate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
}

pub struct TokenActionBlock;

impl TokenActionBlock {
    fn options(ctx: &BlockContext<'_>) -> TokenActionOptions {
        match ctx.options() {
            BlockOptions::TokenAction(options) => options.clone(),
            _ => TokenActionOptions::default(),
        }
    }
}

#[async_trait]
impl BlockHandler for TokenActionBlock {
    fn block_type(&self) -> &'static str {
        BLOCK_TYPE
    }

    async fn handle_event(
        &self,
        ctx: &BlockContext<'_>,
        user: &PolicyUser,
        event: InputEvent,
        _data: serde_json::Value,
    ) -> PolicyResult<BlockOutput> {
        if event != InputEvent::RunEvent {
            return Ok(BlockOutput::empty());
        }

        let options = Self::options(ctx);
        let (wallet, document) = match options.action {
            TokenActionKind::Associate => (
                None,
                ActionDocument::AssociateToken {
                    token_id: options.token_id.clone(),
                    associated: None,
                },
            ),
            TokenActionKind::Dissociate => {
                let wallet = options
                    .wallet
                    .clone()
                    .ok_or_else(|| ctx.action_error("dissociation requires a wallet"))?;
                (
                    Some(wallet.clone()),
                    ActionDocument::DissociateToken {
                        token_id: options.token_id.clone(),
                        wallet,
                        dissociated: None,
                    },
                )
            }
        };

        let record = ctx
            .policy
            .actions
            .request(ctx.node.tag.clone(), user, wallet, document)
            .await
            .map_err(|err| ctx.action_error(err.to_string()))?;

        // Completion arrives later through on_action; nothing to route yet
        Ok(BlockOutput::data(serde_json::json!({
            "pending": record.id,
            "kind": record.document.kind(),
        })))
    }

    async fn on_action(
        &self,
        _ctx: &BlockContext<'_>,
        _user: &PolicyUser,
        record: &ActionRecord,
    ) -> PolicyResult<BlockOutput> {
        let payload = serde_json::json!({
            "id": record.id,
            "document": record.document,
            "status": record.status,
        });
        Ok(match record.status {
            ActionStatus::Completed => {
                BlockOutput::data(payload.clone()).with_emit(OutputEvent::RunEvent, payload)
            }
            _ => BlockOutput::data(payload.clone()).with_emit(OutputEvent::ErrorEvent, payload),
        })
    }

    fn validate(&self, node: &BlockNode, ctx: &mut ValidatorContext<'_>) {
        let BlockOptions::TokenAction(options) = &node.options else {
            return;
        };
        if options.token_id.is_empty() {
            ctx.error("a token id is required");
        }
        if options.action == TokenActionKind::Dissociate && options.wallet.is_none() {
            ctx.error("dissociation requires a wallet");
        }
    }
}

pub fn descriptor() -> BlockDescriptor {
    BlockDescriptor {
        about: BlockAbout {
            block_type: BLOCK_TYPE,
            label: "Token Action",
            capabilities: &["onAction", "validate"],
        },
        handler: Arc::new(TokenActionBlock),
        parse_options: |value| Ok(BlockOptions::TokenAction(parse_options_as(value)?)),
    }
}
