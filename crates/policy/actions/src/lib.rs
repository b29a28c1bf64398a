//! Two-phase policy action protocol.
//!
//! Some block operations cannot complete inside the policy process alone:
//! associating a ledger asset, producing a signature held by another service
//! instance. The protocol coordinates these as a three-party asynchronous
//! two-phase commit over whatever delivery channel the caller provides:
//!
//! 1. The policy side builds a canonical action document and persists it as
//!    `Requested` ([`ActionProtocol::request`]). Delivery is the caller's job.
//! 2. The external actor re-executes the side effect locally and submits the
//!    outcome ([`ActionProtocol::response`]).
//! 3. The policy side checks the correlation fields and the outcome
//!    ([`ActionProtocol::handle_response`]); a mismatched response is marked
//!    `Invalid` and never silently accepted.
//!
//! Unanswered requests are NOT retried here; retry and timeout policy belongs
//! to the caller. State transitions are durable through the [`ActionStore`],
//! so a restart between `Requested` and `Responded` loses nothing.

#![deny(unsafe_code)]

mod document;
mod error;
mod protocol;
mod record;
mod store;

pub use document::ActionDocument;
pub use error::{ActionError, ActionResult};
pub use protocol::{ActionExecutor, ActionProtocol};
pub use record::{ActionPhase, ActionRecord, ActionStatus};
pub use store::{ActionStore, InMemoryActionStore};
