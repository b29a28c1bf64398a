//! The standard block set.

pub mod aggregate;
pub mod calculate;
pub mod container;
pub mod external;
pub mod request;
pub mod roles;
pub mod send;
pub mod token;

use crate::registry::BlockDescriptor;

/// Descriptors for every block type registered by default.
pub fn standard_descriptors() -> Vec<BlockDescriptor> {
    vec![
        container::descriptor(),
        roles::descriptor(),
        request::descriptor(),
        send::descriptor(),
        token::descriptor(),
        aggregate::descriptor(),
        calculate::descriptor(),
        external::descriptor(),
    ]
}
