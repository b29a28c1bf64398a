//! Storage abstractions for the Aegis policy engine.
//!
//! This crate defines the persistence contracts the engine consumes:
//! - document records mutated by policy blocks (system of record)
//! - per-user block cache entries, with large values spilled to blobs
//! - a content-addressed blob store for spilled values and file bodies
//!
//! Design stance:
//! - The engine only sees these traits; the real backend lives behind the
//!   excluded entity layer.
//! - The in-memory adapter is deterministic and test-friendly.

#![deny(unsafe_code)]

mod error;
pub mod memory;
mod model;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryPolicyStorage;
pub use model::{
    BlobRef, BlockCacheEntry, CacheValue, DocumentFilter, DocumentKind, DocumentRecord,
};
pub use traits::{BlobStore, BlockCacheStore, DocumentStore, PolicyStorage};
