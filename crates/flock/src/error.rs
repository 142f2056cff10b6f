//! Error types for the cluster harness.

use flock_core::Address;
use flock_node::NodeError;
use thiserror::Error;

/// Errors that can occur while wiring nodes into a cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A node with this address is already registered.
    #[error("address already in use: {0}")]
    AddressInUse(Address),

    /// No node is registered under this address.
    #[error("unknown node: {0}")]
    UnknownNode(Address),

    /// No free synthetic address was found.
    #[error("no free address after {attempts} attempts")]
    AddressSpaceExhausted { attempts: usize },

    /// A node operation failed.
    #[error("node error: {0}")]
    Node(#[from] NodeError),
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
