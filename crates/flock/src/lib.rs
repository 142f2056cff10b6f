//! # Flock
//!
//! A gossip-protocol membership and replicated-value simulator.
//!
//! ## Overview
//!
//! Every node keeps an eventually-consistent view of cluster membership and
//! a single replicated integer, converging by periodic pairwise anti-entropy:
//!
//! - **Versioned values**: Every piece of state carries the time it was written
//! - **Last-write-wins**: A strictly newer timestamp wins; ties keep what is there
//! - **Tombstones**: Removed peers are marked, propagated, then forgotten after a TTL
//! - **Liveness**: A Dead node refuses calls without being forgotten by its peers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use flock::{Cluster, ClusterConfig};
//!
//! async fn example() {
//!     let cluster = Cluster::new(ClusterConfig::default());
//!
//!     let first = cluster.spawn_node().await.unwrap();
//!     for _ in 0..4 {
//!         cluster.spawn_node().await.unwrap();
//!     }
//!
//!     first.set_local_value(10);
//!
//!     // ... later
//!     let snapshot = cluster.snapshot().await;
//!     println!("{} nodes", snapshot.nodes.len());
//!     cluster.shutdown().await;
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `flock::core` - Versioned values, LWW merge, the peer registry
//! - `flock::node` - The node state machine and transport abstraction

pub mod cluster;
pub mod convergence;
pub mod error;

// Re-export component crates
pub use flock_core as core;
pub use flock_node as node;

pub use cluster::{Cluster, ClusterConfig, ClusterSnapshot, NodeSnapshot, RequestRate};
pub use convergence::{
    verify_convergence, verify_membership_convergence, verify_value_convergence,
    ConvergenceResult,
};
pub use error::{ClusterError, Result};

// Re-export commonly used types
pub use flock_core::{
    lww_merge, Address, Clock, ManualClock, PeerMap, PeerRecord, PeerRegistry, SystemClock,
    Timestamp, VersionedValue,
};
pub use flock_node::{MemoryNetwork, Node, NodeConfig, NodeError, Transport, TransportError};
