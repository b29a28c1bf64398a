//! A running policy instance.
//!
//! The instance owns the built tree, the link table, and the per-policy
//! context, and it is the only place events are routed. Handlers return
//! emissions; the instance walks the links, guarding every traversal with
//! the wave's [`DispatchStep`]. Resolution order for an emitted event:
//! internal links first, then cross-process forwarding for tags hosted by
//! another instance, and silently nothing when no link matches.

use crate::block::BlockContext;
use crate::context::PolicyContext;
use crate::registry::BlockRegistry;
use crate::router::LinkTarget;
use crate::step::DispatchStep;
use crate::tree::{PolicyTree, TreeBuilder};
use crate::{blocks, LinkTable};
use futures::future::BoxFuture;
use policy_actions::{ActionRecord, ActionStatus, InMemoryActionStore};
use policy_storage::InMemoryPolicyStorage;
use policy_transport::topics;
use policy_types::{
    BlockConfig, BlockTag, InputEvent, OutputEvent, PolicyError, PolicyResult, PolicyUser,
};
use std::sync::Arc;

/// One loaded policy.
pub struct PolicyInstance {
    context: PolicyContext,
    registry: Arc<BlockRegistry>,
    tree: PolicyTree,
    links: LinkTable,
    config: BlockConfig,
}

impl PolicyInstance {
    /// Build an instance from a configuration tree.
    pub fn build(
        config: &BlockConfig,
        context: PolicyContext,
        registry: Arc<BlockRegistry>,
    ) -> PolicyResult<Self> {
        let (tree, links) = TreeBuilder::new(&registry)
            .with_remote_tags((*context.remote_tags).clone())
            .build(config)?;
        tracing::info!(
            policy_id = %context.policy_id,
            blocks = tree.len(),
            "Policy instance built"
        );
        Ok(Self {
            context,
            registry,
            tree,
            links,
            config: config.clone(),
        })
    }

    /// Build an instance from a tree imported out of another context; every
    /// node uuid is regenerated, tags survive.
    pub fn import(
        config: &BlockConfig,
        context: PolicyContext,
        registry: Arc<BlockRegistry>,
    ) -> PolicyResult<Self> {
        let (tree, links) = TreeBuilder::import(&registry)
            .with_remote_tags((*context.remote_tags).clone())
            .build(config)?;
        Ok(Self {
            context,
            registry,
            tree,
            links,
            config: config.clone(),
        })
    }

    pub fn context(&self) -> &PolicyContext {
        &self.context
    }

    pub fn tree(&self) -> &PolicyTree {
        &self.tree
    }

    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    fn block_ctx(&self, index: usize) -> BlockContext<'_> {
        BlockContext {
            node: self.tree.node(index),
            tree: &self.tree,
            policy: &self.context,
        }
    }

    fn index_of(&self, tag: &BlockTag) -> PolicyResult<usize> {
        self.tree
            .index_of(tag)
            .ok_or_else(|| PolicyError::TagNotFound(tag.clone()))
    }

    /// A fresh dispatch step whose completion publishes the policy's
    /// debounced state-changed notification.
    pub fn new_step(&self) -> Arc<DispatchStep> {
        let transport = self.context.transport.clone();
        let policy_id = self.context.policy_id.clone();
        let topic = topics::policy_state_changed(&policy_id);
        DispatchStep::new(Box::new(move || {
            tokio::spawn(async move {
                let payload = serde_json::json!({ "policyId": policy_id });
                if let Err(err) = transport.publish(&topic, payload).await {
                    tracing::warn!(%err, "State-changed notification failed");
                }
            });
        }))
    }

    // ── Data Surface ─────────────────────────────────────────────────

    /// Serve a block's render data.
    pub async fn get_data(
        &self,
        tag: &BlockTag,
        user: &PolicyUser,
    ) -> PolicyResult<serde_json::Value> {
        let index = self.index_of(tag)?;
        let handler = self.registry.handler(&self.tree.node(index).block_type)?;
        handler.get_data(&self.block_ctx(index), user).await
    }

    /// Accept a user submission and run the resulting propagation wave.
    pub async fn set_data(
        &self,
        tag: &BlockTag,
        user: &PolicyUser,
        data: serde_json::Value,
    ) -> PolicyResult<serde_json::Value> {
        let step = self.new_step();
        self.set_data_with_step(tag, user, data, &step).await
    }

    /// As [`set_data`](Self::set_data), under a caller-provided step.
    pub async fn set_data_with_step(
        &self,
        tag: &BlockTag,
        user: &PolicyUser,
        data: serde_json::Value,
        step: &Arc<DispatchStep>,
    ) -> PolicyResult<serde_json::Value> {
        let index = self.index_of(tag)?;
        let node = self.tree.node(index);
        let handler = self.registry.handler(&node.block_type)?;

        step.begin();
        let result = match handler.set_data(&self.block_ctx(index), user, data).await {
            Ok(output) => {
                let mut outcome = Ok(output.data);
                for emission in output.emits {
                    if let Err(err) = self
                        .trigger(&node.tag, emission.output, user, emission.data, step)
                        .await
                    {
                        outcome = Err(err);
                        break;
                    }
                }
                outcome
            }
            Err(err) => Err(err),
        };
        step.end();
        result
    }

    /// Enumerate a block's source documents.
    pub async fn get_from_source(
        &self,
        tag: &BlockTag,
        user: &PolicyUser,
        filter: serde_json::Value,
    ) -> PolicyResult<Vec<serde_json::Value>> {
        let index = self.index_of(tag)?;
        let handler = self.registry.handler(&self.tree.node(index).block_type)?;
        handler
            .get_from_source(&self.block_ctx(index), user, filter)
            .await
    }

    // ── Event Routing ────────────────────────────────────────────────

    /// Route one emitted event. No matching link is a no-op, not an error.
    pub async fn trigger(
        &self,
        source: &BlockTag,
        output: OutputEvent,
        user: &PolicyUser,
        data: serde_json::Value,
        step: &Arc<DispatchStep>,
    ) -> PolicyResult<()> {
        for link in self.links.resolve(source, output) {
            if link.is_disabled() {
                continue;
            }
            match &link.resolution {
                LinkTarget::Local(index) => {
                    self.deliver(*index, link.input, user, data.clone(), step)
                        .await?;
                }
                LinkTarget::Remote(policy_id) => {
                    let topic = topics::policy_events(policy_id);
                    let payload = serde_json::json!({
                        "sourcePolicy": self.context.policy_id,
                        "target": link.target,
                        "input": link.input,
                        "user": user,
                        "data": data,
                    });
                    self.context
                        .transport
                        .publish(&topic, payload)
                        .await
                        .map_err(PolicyError::from)?;
                    tracing::debug!(
                        source = %source,
                        target = %link.target,
                        remote = %policy_id,
                        "Event forwarded to remote instance"
                    );
                }
            }
        }
        Ok(())
    }

    /// Deliver one input event to a local block and route whatever it emits.
    /// A failing handler is logged and its siblings continue; a detected
    /// cycle propagates.
    fn deliver<'a>(
        &'a self,
        index: usize,
        input: InputEvent,
        user: &'a PolicyUser,
        data: serde_json::Value,
        step: &'a Arc<DispatchStep>,
    ) -> BoxFuture<'a, PolicyResult<()>> {
        Box::pin(async move {
            let node = self.tree.node(index);
            step.enter(&node.tag, input)?;

            let result = async {
                let handler = self.registry.handler(&node.block_type)?;
                let output = handler
                    .handle_event(&self.block_ctx(index), user, input, data)
                    .await?;
                for emission in output.emits {
                    self.trigger(&node.tag, emission.output, user, emission.data, step)
                        .await?;
                }
                Ok::<(), PolicyError>(())
            }
            .await;

            step.exit(&node.tag, input);

            match result {
                Err(err @ PolicyError::EventLoop { .. }) => Err(err),
                Err(err) => {
                    tracing::warn!(block = %node.tag, %err, "Block event handler failed");
                    Ok(())
                }
                Ok(()) => Ok(()),
            }
        })
    }

    /// Deliver an event forwarded from another instance.
    pub async fn deliver_remote(
        &self,
        target: &BlockTag,
        input: InputEvent,
        user: &PolicyUser,
        data: serde_json::Value,
    ) -> PolicyResult<()> {
        let index = self.index_of(target)?;
        let step = self.new_step();
        step.begin();
        let result = self.deliver(index, input, user, data, &step).await;
        step.end();
        result
    }

    /// Push external data into every intake block of the tree. Returns how
    /// many blocks accepted it.
    pub async fn receive_external(
        &self,
        user: &PolicyUser,
        data: serde_json::Value,
    ) -> PolicyResult<usize> {
        let step = self.new_step();
        let mut delivered = 0;
        step.begin();
        for index in self.tree.pre_order() {
            let node = self.tree.node(index);
            if node.block_type != blocks::external::BLOCK_TYPE {
                continue;
            }
            let handler = self.registry.handler(&node.block_type)?;
            match handler
                .set_data(&self.block_ctx(index), user, data.clone())
                .await
            {
                Ok(output) => {
                    delivered += 1;
                    for emission in output.emits {
                        self.trigger(&node.tag, emission.output, user, emission.data, &step)
                            .await?;
                    }
                }
                Err(err) => {
                    tracing::warn!(block = %node.tag, %err, "External intake failed");
                }
            }
        }
        step.end();
        Ok(delivered)
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// Settle an incoming action response through the protocol and feed the
    /// outcome back into the graph.
    pub async fn handle_action_response(&self, response: ActionRecord) -> PolicyResult<()> {
        let settled = self.context.actions.handle_response(response).await?;
        self.complete_action(settled).await
    }

    /// Feed a settled action back to its originating block and broadcast
    /// the completion.
    pub async fn complete_action(&self, record: ActionRecord) -> PolicyResult<()> {
        let index = self.index_of(&record.block_tag)?;
        let node = self.tree.node(index);
        let handler = self.registry.handler(&node.block_type)?;
        let user = PolicyUser::new(
            record.owner_did.clone(),
            record.owner_did.clone(),
            record.account_id.as_str(),
        );

        let step = self.new_step();
        step.begin();
        let outcome = match handler
            .on_action(&self.block_ctx(index), &user, &record)
            .await
        {
            Ok(output) => {
                let mut outcome = Ok(());
                for emission in output.emits {
                    if let Err(err) = self
                        .trigger(&node.tag, emission.output, &user, emission.data, &step)
                        .await
                    {
                        outcome = Err(err);
                        break;
                    }
                }
                outcome
            }
            Err(err) => Err(err),
        };
        step.end();

        let (data, error) = match record.status {
            ActionStatus::Completed => (
                Some(serde_json::to_value(&record.document).unwrap_or_default()),
                None,
            ),
            status => (None, Some(format!("{status:?}"))),
        };
        self.context
            .transport
            .publish(
                topics::TASK_COMPLETE_BROADCAST,
                serde_json::json!({
                    "id": record.id,
                    "data": data,
                    "error": error,
                }),
            )
            .await
            .map_err(PolicyError::from)?;

        outcome
    }

    // ── Dry Run ──────────────────────────────────────────────────────

    /// Execute one block against scratch stores: same configuration, fresh
    /// in-memory storage, transport, and actions, so nothing persists and
    /// nothing leaks out.
    pub async fn dry_run_block(
        &self,
        tag: &BlockTag,
        user: &PolicyUser,
        data: serde_json::Value,
    ) -> PolicyResult<serde_json::Value> {
        let scratch_context = PolicyContext::new(
            self.context.policy_id.clone(),
            self.context.owner.clone(),
            Arc::new(InMemoryPolicyStorage::new()),
            Arc::new(policy_transport::InMemoryTransport::new()),
            Arc::new(InMemoryActionStore::new()),
        )
        .with_remote_tags((*self.context.remote_tags).clone());

        let scratch = PolicyInstance::build(&self.config, scratch_context, self.registry.clone())?;
        scratch.set_data(tag, user, data).await
    }
}
