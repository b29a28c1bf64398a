//! Policy domain types for the Aegis policy block engine.
//!
//! A policy is an executable graph of typed processing nodes ("blocks"),
//! persisted as a nested configuration tree. This crate defines the
//! identifiers, the configuration format, the event vocabulary, the user
//! descriptor consumed from the identity layer, and the error kinds shared
//! across the engine crates.
//!
//! Everything here is plain data: no I/O, no runtime state.

#![deny(unsafe_code)]

mod config;
mod errors;
mod events;
mod ids;
mod user;

pub use config::{BlockConfig, EventConfig};
pub use errors::{PolicyError, PolicyResult, ValidationFailure};
pub use events::{EventActor, InputEvent, OutputEvent};
pub use ids::{AccountId, ActionId, BlockId, BlockTag, PolicyId};
pub use user::PolicyUser;
