//! # Flock Node
//!
//! The gossip node: a state machine that keeps an eventually-consistent view
//! of cluster membership and one replicated value, converging with peers by
//! periodic pairwise anti-entropy.
//!
//! ## Overview
//!
//! Each [`Node`] runs three background loops:
//!
//! - **Anti-entropy**: contacts every live peer in turn, one per tick,
//!   pushing its value and exchanging peer lists
//! - **Self-heal**: re-asserts the node's own registry entry
//! - **Sweep**: deletes tombstones older than the TTL
//!
//! Other nodes reach it through [`Node::handle_set_value`] and
//! [`Node::handle_exchange_peers`], invoked by whatever implements
//! [`Transport`]. [`MemoryNetwork`] is an in-process implementation.
//!
//! ## Key Properties
//!
//! - **Idempotent**: Re-delivering any message changes nothing
//! - **Order-insensitive**: Merge is last-write-wins per entry
//! - **Lock-disciplined**: No lock is held across a transport call
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flock_core::{Address, SystemClock};
//! use flock_node::{MemoryNetwork, Node, NodeConfig};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let a = Node::new(Address::from("a"), network.transport(), Arc::new(SystemClock), NodeConfig::default());
//!     let b = Node::new(Address::from("b"), network.transport(), Arc::new(SystemClock), NodeConfig::default());
//!     network.register(a.clone()).await;
//!     network.register(b.clone()).await;
//!
//!     a.add_peer(Address::from("b"));
//!     a.set_local_value(10);
//!     a.launch().unwrap();
//!     b.launch().unwrap();
//! }
//! ```
//!
//! ## Round Trip
//!
//! ```text
//! Node A                              Node B
//!   |-------- push_value ------------->|  B keeps the newer value
//!   |-------- exchange_peers --------->|  B merges A's registry
//!   |<------- merged registry ---------|  A merges, refreshes B
//! ```

pub mod config;
pub mod error;
mod gossip;
pub mod node;
pub mod transport;

pub use config::NodeConfig;
pub use error::{NodeError, Result, TransportError};
pub use node::Node;
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
