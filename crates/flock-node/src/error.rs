//! Error types for the node module.

use flock_core::Address;
use thiserror::Error;

/// Errors returned by a node's own operations and inbound handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The node is Dead. Transient: callers must not tombstone it for this.
    #[error("node {0} is temporarily unavailable")]
    Unavailable(Address),

    /// The node was stopped and will never serve again.
    #[error("node {0} is stopped")]
    Stopped(Address),

    /// The call needs a tokio runtime and none was available.
    #[error("node {0} has no tokio runtime to spawn on")]
    NoRuntime(Address),

    /// Contacting a peer failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors a [`Transport`](crate::Transport) reports for an outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The destination no longer exists.
    #[error("peer {0} is removed")]
    Removed(Address),

    /// The destination exists but cannot process requests right now.
    #[error("peer {0} is temporarily unavailable")]
    Unavailable(Address),

    /// Delivery failed for another reason.
    #[error("delivery to {peer} failed: {reason}")]
    Failure { peer: Address, reason: String },
}

impl TransportError {
    /// Whether the caller should tombstone the peer.
    ///
    /// Only `Unavailable` is transient; everything else is treated as the
    /// peer being gone.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, TransportError::Unavailable(_))
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
