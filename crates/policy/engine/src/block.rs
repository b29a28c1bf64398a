//! The block capability contract and typed options.

use crate::cache::BlockUserCache;
use crate::context::PolicyContext;
use crate::tree::{BlockNode, PolicyTree};
use crate::validator::ValidatorContext;
use async_trait::async_trait;
use policy_actions::ActionRecord;
use policy_types::{InputEvent, OutputEvent, PolicyError, PolicyResult, PolicyUser};
use serde::{Deserialize, Serialize};

use crate::blocks::aggregate::AggregateOptions;
use crate::blocks::calculate::CalculateOptions;
use crate::blocks::container::ContainerOptions;
use crate::blocks::external::ExternalDataOptions;
use crate::blocks::request::RequestDocumentOptions;
use crate::blocks::roles::RolesOptions;
use crate::blocks::send::SendDocumentOptions;
use crate::blocks::token::TokenActionOptions;

/// Options of one block, parsed from the raw config exactly once at build
/// time. Downstream code works with typed fields, not runtime lookups.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BlockOptions {
    Container(ContainerOptions),
    Roles(RolesOptions),
    RequestDocument(RequestDocumentOptions),
    SendDocument(SendDocumentOptions),
    TokenAction(TokenActionOptions),
    Aggregate(AggregateOptions),
    Calculate(CalculateOptions),
    ExternalData(ExternalDataOptions),
}

/// One event a handler asks the instance to route onward.
#[derive(Clone, Debug)]
pub struct BlockEmission {
    pub output: OutputEvent,
    pub data: serde_json::Value,
}

/// What a handler invocation produced: a payload for the caller plus
/// emissions for the router.
#[derive(Clone, Debug, Default)]
pub struct BlockOutput {
    pub data: serde_json::Value,
    pub emits: Vec<BlockEmission>,
}

impl BlockOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data,
            emits: Vec::new(),
        }
    }

    pub fn with_emit(mut self, output: OutputEvent, data: serde_json::Value) -> Self {
        self.emits.push(BlockEmission { output, data });
        self
    }
}

/// What a handler sees of the instance: its own node plus the policy's
/// service bundle.
pub struct BlockContext<'a> {
    pub node: &'a BlockNode,
    pub tree: &'a PolicyTree,
    pub policy: &'a PolicyContext,
}

impl BlockContext<'_> {
    pub fn options(&self) -> &BlockOptions {
        &self.node.options
    }

    /// Per-user cache scoped to this block.
    pub fn cache(&self) -> BlockUserCache {
        BlockUserCache::new(
            self.policy.policy_id.clone(),
            self.node.id.clone(),
            self.policy.cache.clone(),
        )
    }

    /// A recoverable failure carrying this block's context.
    pub fn action_error(&self, message: impl Into<String>) -> PolicyError {
        PolicyError::block_action(message, self.node.block_type.clone(), self.node.id.clone())
    }

    /// The standard error for a capability this block type lacks.
    pub fn unsupported(&self, operation: &str) -> PolicyError {
        PolicyError::unsupported(operation, self.node.block_type.clone(), self.node.id.clone())
    }
}

/// The capability set of a block type.
///
/// A concrete type implements the subset it supports; everything else keeps
/// the default. Data capabilities default to a structured "unsupported"
/// failure, event handling defaults to ignoring the event, and validation
/// defaults to permissive: a type with no rules is valid, which older
/// configurations rely on.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    /// Registered type name.
    fn block_type(&self) -> &'static str;

    /// Serve the block's render data to a user.
    async fn get_data(
        &self,
        ctx: &BlockContext<'_>,
        _user: &PolicyUser,
    ) -> PolicyResult<serde_json::Value> {
        Err(ctx.unsupported("getData"))
    }

    /// Accept a user submission.
    async fn set_data(
        &self,
        ctx: &BlockContext<'_>,
        _user: &PolicyUser,
        _data: serde_json::Value,
    ) -> PolicyResult<BlockOutput> {
        Err(ctx.unsupported("setData"))
    }

    /// Enumerate source documents for addon/filter consumers.
    async fn get_from_source(
        &self,
        ctx: &BlockContext<'_>,
        _user: &PolicyUser,
        _filter: serde_json::Value,
    ) -> PolicyResult<Vec<serde_json::Value>> {
        Err(ctx.unsupported("getFromSource"))
    }

    /// React to an input event arriving over a link.
    async fn handle_event(
        &self,
        _ctx: &BlockContext<'_>,
        _user: &PolicyUser,
        _event: InputEvent,
        _data: serde_json::Value,
    ) -> PolicyResult<BlockOutput> {
        Ok(BlockOutput::empty())
    }

    /// React to a settled two-phase action addressed to this block.
    async fn on_action(
        &self,
        _ctx: &BlockContext<'_>,
        _user: &PolicyUser,
        _record: &ActionRecord,
    ) -> PolicyResult<BlockOutput> {
        Ok(BlockOutput::empty())
    }

    /// Structural validation rules; findings accumulate in the context.
    fn validate(&self, _node: &BlockNode, _ctx: &mut ValidatorContext<'_>) {}
}
