//! The Aegis policy block engine.
//!
//! A policy is a directed graph of typed processing blocks. The engine:
//! 1. Builds an in-memory block tree from a persisted configuration
//! 2. Validates the tree, accumulating per-block findings
//! 3. Routes input/output events along graph edges and tag-addressed links
//! 4. Gives blocks per-user cached state and a transform worker pool
//! 5. Wires two-phase actions back into block event flow
//!
//! # Key Principle
//!
//! **The instance coordinates, blocks act.** Handlers never call each other;
//! they return emissions and the instance routes them, tracking every edge
//! traversal in a [`DispatchStep`] so one propagation wave produces exactly
//! one debounced completion notification.
//!
//! # Example
//!
//! ```no_run
//! use policy_engine::{BlockRegistry, PolicyContext, PolicyInstance};
//! use policy_storage::InMemoryPolicyStorage;
//! use policy_transport::InMemoryTransport;
//! use policy_actions::InMemoryActionStore;
//! use policy_types::{BlockConfig, PolicyId, PolicyUser};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(BlockRegistry::standard());
//! let context = PolicyContext::new(
//!     PolicyId::generate(),
//!     "did:aegis:owner",
//!     Arc::new(InMemoryPolicyStorage::new()),
//!     Arc::new(InMemoryTransport::new()),
//!     Arc::new(InMemoryActionStore::new()),
//! );
//!
//! let config = BlockConfig::new("interfaceContainerBlock").with_tag("root");
//! let instance = PolicyInstance::build(&config, context, registry)?;
//!
//! let user = PolicyUser::new("did:aegis:alice", "alice", "0.0.100");
//! let data = instance.get_data(&policy_types::BlockTag::new("root"), &user).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod block;
pub mod blocks;
pub mod cache;
pub mod context;
pub mod instance;
pub mod registry;
pub mod router;
pub mod service;
pub mod step;
pub mod transform;
pub mod tree;
pub mod validator;

// Re-export main types
pub use block::{BlockContext, BlockEmission, BlockHandler, BlockOptions, BlockOutput};
pub use cache::BlockUserCache;
pub use context::PolicyContext;
pub use instance::PolicyInstance;
pub use registry::{BlockAbout, BlockDescriptor, BlockRegistry};
pub use router::{EventLink, LinkTable, LinkTarget};
pub use service::PolicyEngineService;
pub use step::DispatchStep;
pub use transform::TransformPool;
pub use tree::{BlockNode, PolicyTree, TreeBuilder};
pub use validator::{validate, validate_config, ValidationReport, ValidationResources};
