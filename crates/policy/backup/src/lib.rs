//! Differential backup engine for policy document collections.
//!
//! Policy state must be replicable and restorable without re-transmitting
//! unchanged documents. Every row carries two hashes: `prop_hash` over its
//! metadata fields and `doc_hash` over its (possibly externally stored) body.
//! A backup pass compares current hashes against the last acknowledged
//! snapshot and emits a minimal, ordered list of insert/update/delete
//! actions plus a cumulative hash, so two replicas can cheaply verify they
//! converged without comparing full documents.
//!
//! File bodies are only transferred when `doc_hash` changed, decoupling
//! metadata churn from potentially large body transfer.

#![deny(unsafe_code)]

mod collection;
mod coordinator;
mod diff;
mod document;
mod error;

pub use collection::CollectionBackup;
pub use coordinator::{BackupCoordinator, PolicyDiff};
pub use diff::{
    action_hash, cumulative_hash, BackupEntry, CollectionDiff, CollectionSnapshot, DiffAction,
    DiffActionType, SnapshotRow,
};
pub use document::DocumentCollectionBackup;
pub use error::{BackupError, BackupResult};
