//! Block tree construction.
//!
//! The tree is arena-backed: nodes live in one vector in pre-order, children
//! are index lists, and a node's parent is an index, so there are no
//! ownership cycles.
//! Tags go into a policy-scoped lookup table the router resolves against.

use crate::block::BlockOptions;
use crate::registry::BlockRegistry;
use crate::router::{EventLink, LinkTable, LinkTarget};
use policy_types::{
    BlockConfig, BlockId, BlockTag, EventConfig, InputEvent, OutputEvent, PolicyError,
    PolicyId, PolicyResult,
};
use std::collections::{HashMap, HashSet};

/// One block instance in the arena.
#[derive(Clone, Debug)]
pub struct BlockNode {
    pub id: BlockId,
    pub tag: BlockTag,
    pub block_type: String,
    pub options: BlockOptions,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// The built block tree of one policy.
pub struct PolicyTree {
    nodes: Vec<BlockNode>,
    tags: HashMap<BlockTag, usize>,
}

impl PolicyTree {
    pub fn root(&self) -> &BlockNode {
        &self.nodes[0]
    }

    pub fn node(&self, index: usize) -> &BlockNode {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, tag: &BlockTag) -> Option<usize> {
        self.tags.get(tag).copied()
    }

    pub fn get_by_tag(&self, tag: &BlockTag) -> Option<&BlockNode> {
        self.index_of(tag).map(|index| &self.nodes[index])
    }

    pub fn get_by_id(&self, id: &BlockId) -> Option<&BlockNode> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// Node indices in depth-first pre-order. The arena is laid out in
    /// pre-order during construction, so this is just the index range.
    pub fn pre_order(&self) -> impl Iterator<Item = usize> {
        0..self.nodes.len()
    }

    /// How many nodes carry a tag (always 0 or 1 after a successful build).
    pub fn tag_count(&self, tag: &BlockTag) -> usize {
        usize::from(self.tags.contains_key(tag))
    }
}

/// Builds a [`PolicyTree`] and its [`LinkTable`] from a configuration tree.
pub struct TreeBuilder<'a> {
    registry: &'a BlockRegistry,
    regenerate_ids: bool,
    remote_tags: HashMap<BlockTag, PolicyId>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(registry: &'a BlockRegistry) -> Self {
        Self {
            registry,
            regenerate_ids: false,
            remote_tags: HashMap::new(),
        }
    }

    /// Import mode: every node uuid is regenerated so a tree copied into a
    /// new context cannot collide with the original. Tag-based references
    /// survive untouched.
    pub fn import(registry: &'a BlockRegistry) -> Self {
        Self {
            registry,
            regenerate_ids: true,
            remote_tags: HashMap::new(),
        }
    }

    /// Tags known to live in other running policy instances.
    pub fn with_remote_tags(mut self, remote_tags: HashMap<BlockTag, PolicyId>) -> Self {
        self.remote_tags = remote_tags;
        self
    }

    /// Build the tree. Fails with a build-time error on an unknown block
    /// type, a duplicate tag, malformed options, or an event reference to a
    /// tag that resolves neither locally nor remotely.
    pub fn build(&self, config: &BlockConfig) -> PolicyResult<(PolicyTree, LinkTable)> {
        let mut nodes: Vec<BlockNode> = Vec::with_capacity(config.node_count());
        let mut tags: HashMap<BlockTag, usize> = HashMap::new();
        let mut seen_ids: HashSet<BlockId> = HashSet::new();
        let mut events: Vec<EventConfig> = Vec::new();

        self.add_node(config, None, &mut nodes, &mut tags, &mut seen_ids, &mut events)?;

        let tree = PolicyTree { nodes, tags };
        let links = self.build_links(&tree, &events)?;

        tracing::debug!(
            nodes = tree.len(),
            links = links.len(),
            "Policy tree built"
        );
        Ok((tree, links))
    }

    fn add_node(
        &self,
        config: &BlockConfig,
        parent: Option<usize>,
        nodes: &mut Vec<BlockNode>,
        tags: &mut HashMap<BlockTag, usize>,
        seen_ids: &mut HashSet<BlockId>,
        events: &mut Vec<EventConfig>,
    ) -> PolicyResult<usize> {
        let descriptor = self
            .registry
            .get(&config.block_type)
            .ok_or_else(|| PolicyError::UnknownBlockType(config.block_type.clone()))?;

        let index = nodes.len();
        let tag = config
            .tag
            .clone()
            .unwrap_or_else(|| BlockTag::new(format!("block_{index}")));
        if tags.insert(tag.clone(), index).is_some() {
            return Err(PolicyError::DuplicateTag(tag));
        }

        let id = match &config.uuid {
            Some(id) if !self.regenerate_ids && !seen_ids.contains(id) => id.clone(),
            _ => BlockId::generate(),
        };
        seen_ids.insert(id.clone());

        let options = (descriptor.parse_options)(&config.options).map_err(|err| {
            PolicyError::block_init(err.to_string(), config.block_type.clone(), id.clone())
        })?;

        nodes.push(BlockNode {
            id,
            tag,
            block_type: config.block_type.clone(),
            options,
            parent,
            children: Vec::new(),
        });
        events.extend(config.events.iter().cloned());

        for child in &config.children {
            let child_index =
                self.add_node(child, Some(index), nodes, tags, seen_ids, events)?;
            nodes[index].children.push(child_index);
        }
        Ok(index)
    }

    fn build_links(&self, tree: &PolicyTree, events: &[EventConfig]) -> PolicyResult<LinkTable> {
        let mut table = LinkTable::new();

        for event in events {
            if tree.index_of(&event.source).is_none() {
                return Err(PolicyError::TagNotFound(event.source.clone()));
            }
            let resolution = match tree.index_of(&event.target) {
                Some(index) => LinkTarget::Local(index),
                None => match self.remote_tags.get(&event.target) {
                    Some(policy_id) => LinkTarget::Remote(policy_id.clone()),
                    None => return Err(PolicyError::TagNotFound(event.target.clone())),
                },
            };
            table.register(EventLink::new(event, resolution));
        }

        // Default refresh propagation: every child notifies its parent
        for index in tree.pre_order() {
            let node = tree.node(index);
            if let Some(parent) = node.parent {
                let config = EventConfig::new(
                    node.tag.as_str(),
                    OutputEvent::RefreshEvent,
                    tree.node(parent).tag.as_str(),
                    InputEvent::RefreshEvent,
                );
                table.register(EventLink::new(&config, LinkTarget::Local(parent)));
            }
        }

        Ok(table)
    }
}
