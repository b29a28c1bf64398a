//! Event links and their lookup table.
//!
//! Links are resolved once at build time. A link whose target tag lives in
//! the local tree delivers in-process; a link whose target belongs to another
//! running policy instance is forwarded over the transport. Only `disabled`
//! is mutable after build.

use policy_types::{BlockTag, EventActor, EventConfig, InputEvent, OutputEvent, PolicyId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where a link delivers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkTarget {
    /// Arena index of the target node in the local tree
    Local(usize),
    /// The policy instance hosting the target tag
    Remote(PolicyId),
}

/// One resolved event link.
#[derive(Debug)]
pub struct EventLink {
    pub source: BlockTag,
    pub target: BlockTag,
    pub input: InputEvent,
    pub output: OutputEvent,
    pub actor: EventActor,
    pub resolution: LinkTarget,
    disabled: AtomicBool,
}

impl EventLink {
    pub fn new(config: &EventConfig, resolution: LinkTarget) -> Self {
        Self {
            source: config.source.clone(),
            target: config.target.clone(),
            input: config.input,
            output: config.output,
            actor: config.actor,
            resolution,
            disabled: AtomicBool::new(config.disabled),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }
}

/// All links of one policy, indexed by `(source tag, output event)`.
#[derive(Default)]
pub struct LinkTable {
    links: Vec<Arc<EventLink>>,
    by_source: HashMap<(BlockTag, OutputEvent), Vec<usize>>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, link: EventLink) {
        let key = (link.source.clone(), link.output);
        let index = self.links.len();
        self.links.push(Arc::new(link));
        self.by_source.entry(key).or_default().push(index);
    }

    /// Links firing for one `(source, output)` pair, in registration order.
    pub fn resolve(&self, source: &BlockTag, output: OutputEvent) -> Vec<Arc<EventLink>> {
        self.by_source
            .get(&(source.clone(), output))
            .map(|indices| indices.iter().map(|i| self.links[*i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EventLink>> {
        self.links.iter()
    }

    /// Toggle one link. Returns false when no such link exists.
    pub fn set_disabled(
        &self,
        source: &BlockTag,
        output: OutputEvent,
        target: &BlockTag,
        input: InputEvent,
        disabled: bool,
    ) -> bool {
        for link in self.resolve(source, output) {
            if &link.target == target && link.input == input {
                link.set_disabled(disabled);
                return true;
            }
        }
        false
    }
}
