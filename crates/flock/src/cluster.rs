//! The cluster harness: wires nodes onto one in-memory network.
//!
//! A [`Cluster`] plays the role of process wiring for a simulation. It owns
//! the node directory, hands out synthetic addresses, bootstraps new nodes
//! into the membership, and exposes snapshots for a visualizer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use flock_core::{Address, Clock, PeerMap, SystemClock, VersionedValue};
use flock_node::{MemoryNetwork, Node, NodeConfig};

use crate::convergence::{verify_convergence, ConvergenceResult};
use crate::error::{ClusterError, Result};

/// Attempts at drawing an unused synthetic address before giving up.
const MAX_ADDRESS_ATTEMPTS: usize = 64;

/// Configuration for a simulated cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfig {
    /// Configuration applied to every spawned node.
    pub node: NodeConfig,
    /// Simulated delay applied to every call on the network.
    pub latency: Option<Duration>,
}

/// A set of nodes gossiping over one [`MemoryNetwork`].
pub struct Cluster {
    network: Arc<MemoryNetwork>,
    clock: Arc<dyn Clock>,
    config: ClusterConfig,
}

impl Cluster {
    /// Create an empty cluster on wall-clock time.
    pub fn new(config: ClusterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty cluster whose nodes share `clock`.
    pub fn with_clock(config: ClusterConfig, clock: Arc<dyn Clock>) -> Self {
        let network = match config.latency {
            Some(latency) => MemoryNetwork::with_latency(latency),
            None => MemoryNetwork::new(),
        };
        Self {
            network,
            clock,
            config,
        }
    }

    /// The underlying node directory.
    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }

    /// Spawn a node at a fresh synthetic IPv4 address.
    pub async fn spawn_node(&self) -> Result<Arc<Node>> {
        for _ in 0..MAX_ADDRESS_ATTEMPTS {
            let address = synthetic_address();
            match self.spawn_node_at(address).await {
                Err(ClusterError::AddressInUse(taken)) => {
                    warn!(address = %taken, "Address already exists, trying again");
                }
                result => return result,
            }
        }
        Err(ClusterError::AddressSpaceExhausted {
            attempts: MAX_ADDRESS_ATTEMPTS,
        })
    }

    /// Spawn and launch a node at `address`.
    ///
    /// One existing node, chosen at random, learns the newcomer so that the
    /// rest of the cluster hears of it through gossip.
    pub async fn spawn_node_at(&self, address: Address) -> Result<Arc<Node>> {
        let seed = self.choose_node().await;

        let node = Node::new(
            address.clone(),
            self.network.transport(),
            Arc::clone(&self.clock),
            self.config.node.clone(),
        );
        if !self.network.register_if_absent(Arc::clone(&node)).await {
            return Err(ClusterError::AddressInUse(address));
        }
        if let Err(err) = node.launch() {
            self.network.unregister(&address).await;
            return Err(err.into());
        }

        if let Some(seed) = seed {
            seed.add_peer(address.clone());
            info!(node = %address, seed = %seed.address(), "Spawned node");
        } else {
            info!(node = %address, "Spawned first node");
        }
        Ok(node)
    }

    /// Unregister and stop a node. Its peers will tombstone it.
    pub async fn remove_node(&self, address: &Address) -> Result<Arc<Node>> {
        let node = self
            .network
            .unregister(address)
            .await
            .ok_or_else(|| ClusterError::UnknownNode(address.clone()))?;
        node.stop();
        node.join().await;
        info!(node = %address, "Removed node");
        Ok(node)
    }

    /// A random running node, if any.
    pub async fn choose_node(&self) -> Option<Arc<Node>> {
        let nodes = self.network.nodes().await;
        nodes.choose(&mut rand::thread_rng()).cloned()
    }

    /// Look up a node.
    pub async fn node(&self, address: &Address) -> Result<Arc<Node>> {
        self.network
            .get(address)
            .await
            .ok_or_else(|| ClusterError::UnknownNode(address.clone()))
    }

    /// Every node address, sorted.
    pub async fn addresses(&self) -> Vec<Address> {
        self.network.addresses().await
    }

    /// Total calls made on the network so far.
    pub fn request_count(&self) -> u64 {
        self.network.request_count()
    }

    /// Copy every node's observable state, sorted by address.
    pub async fn snapshot(&self) -> ClusterSnapshot {
        let nodes = self
            .network
            .nodes()
            .await
            .iter()
            .map(|node| NodeSnapshot::of(node))
            .collect();
        ClusterSnapshot { nodes }
    }

    /// Check whether every node agrees on value and membership.
    pub async fn convergence(&self) -> ConvergenceResult {
        verify_convergence(&self.snapshot().await)
    }

    /// Stop every node and wait for its tasks to exit.
    pub async fn shutdown(&self) {
        let nodes = self.network.nodes().await;
        for node in &nodes {
            node.stop();
        }
        for node in &nodes {
            node.join().await;
        }
        info!(count = nodes.len(), "Cluster shut down");
    }
}

/// A random dotted-quad address.
fn synthetic_address() -> Address {
    let octets: [u8; 4] = rand::thread_rng().gen();
    Address::new(format!(
        "{}.{}.{}.{}",
        octets[0], octets[1], octets[2], octets[3]
    ))
}

/// Observable state of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub address: Address,
    pub alive: bool,
    pub value: VersionedValue<i64>,
    pub peers: PeerMap,
}

impl NodeSnapshot {
    /// Capture a node's current state.
    pub fn of(node: &Node) -> Self {
        Self {
            address: node.address().clone(),
            alive: node.is_alive(),
            value: node.value(),
            peers: node.registry_snapshot(),
        }
    }
}

/// Observable state of a whole cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub nodes: Vec<NodeSnapshot>,
}

/// Requests per second derived from successive samples of a request counter.
#[derive(Debug, Clone)]
pub struct RequestRate {
    last_count: u64,
    last_at: Instant,
    rate: f64,
}

impl RequestRate {
    /// Start metering from `count` requests seen at `at`.
    pub fn new(count: u64, at: Instant) -> Self {
        Self {
            last_count: count,
            last_at: at,
            rate: 0.0,
        }
    }

    /// Record a new sample and return the rate since the previous one.
    ///
    /// A sample taken at the same instant as the previous one keeps the last
    /// rate.
    pub fn sample(&mut self, count: u64, at: Instant) -> f64 {
        let elapsed = at.saturating_duration_since(self.last_at).as_secs_f64();
        if elapsed > 0.0 {
            let delta = count.saturating_sub(self.last_count) as f64;
            self.rate = delta / elapsed;
            self.last_count = count;
            self.last_at = at;
        }
        self.rate
    }

    /// The most recently computed rate.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}
