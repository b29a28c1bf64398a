//! Event vocabulary for block-to-block links.
//!
//! Input and output events are distinct sets: an output event of one block is
//! wired to an input event of another by an [`EventConfig`](crate::EventConfig)
//! entry. The names below mirror the persisted configuration format.

use serde::{Deserialize, Serialize};

/// Events a block can receive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputEvent {
    /// Execute the block's main action with the event payload
    RunEvent,
    /// Re-read state, typically after a descendant changed something
    RefreshEvent,
    /// A held document has been released downstream
    ReleaseEvent,
    /// Periodic tick from a timer block
    TimerEvent,
    /// Remove a document from the block's working set
    PopEvent,
    /// Replay state during restore
    RestoreEvent,
}

/// Events a block can emit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputEvent {
    /// The block's action finished and produced a payload
    RunEvent,
    /// The block's state changed without producing a payload
    RefreshEvent,
    /// A held document was released
    ReleaseEvent,
    /// Timer tick
    TimerEvent,
    /// The block's action failed; payload carries the error context
    ErrorEvent,
}

/// Whose identity an event is delivered under when it crosses a link
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventActor {
    /// The policy owner
    Owner,
    /// The issuer of the document carried by the event
    Issuer,
    /// The user who initiated the propagation wave
    #[default]
    EventInitiator,
}

impl InputEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputEvent::RunEvent => "RunEvent",
            InputEvent::RefreshEvent => "RefreshEvent",
            InputEvent::ReleaseEvent => "ReleaseEvent",
            InputEvent::TimerEvent => "TimerEvent",
            InputEvent::PopEvent => "PopEvent",
            InputEvent::RestoreEvent => "RestoreEvent",
        }
    }
}

impl OutputEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputEvent::RunEvent => "RunEvent",
            OutputEvent::RefreshEvent => "RefreshEvent",
            OutputEvent::ReleaseEvent => "ReleaseEvent",
            OutputEvent::TimerEvent => "TimerEvent",
            OutputEvent::ErrorEvent => "ErrorEvent",
        }
    }
}
