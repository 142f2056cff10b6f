//! Test fixtures and helpers.
//!
//! Common setup code for multi-node tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use flock_core::{Address, ManualClock, Timestamp};
use flock_node::{MemoryNetwork, Node, NodeConfig, Result};

/// Nodes registered on one in-memory network, sharing a manual clock.
///
/// Nodes are not launched; tests either drive rounds by hand with
/// [`TestCluster::gossip_round`] or call [`TestCluster::launch_all`].
pub struct TestCluster {
    pub network: Arc<MemoryNetwork>,
    pub clock: ManualClock,
    nodes: Vec<Arc<Node>>,
}

impl TestCluster {
    /// The clock reading every fixture starts from.
    pub const START: Timestamp = Timestamp::from_secs(1_000);

    /// Create isolated nodes that know only themselves.
    pub async fn new(names: &[&str]) -> Self {
        Self::with_config(names, NodeConfig::default()).await
    }

    /// Create isolated nodes with a specific configuration.
    pub async fn with_config(names: &[&str], config: NodeConfig) -> Self {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(Self::START);
        let mut nodes = Vec::with_capacity(names.len());

        for name in names {
            let node = Node::new(
                Address::from(*name),
                network.transport(),
                Arc::new(clock.clone()),
                config.clone(),
            );
            network.register(Arc::clone(&node)).await;
            nodes.push(node);
        }

        Self {
            network,
            clock,
            nodes,
        }
    }

    /// Create nodes that each know every other node.
    pub async fn fully_meshed(names: &[&str]) -> Self {
        let cluster = Self::new(names).await;
        for node in &cluster.nodes {
            for name in names {
                node.add_peer(Address::from(*name));
            }
        }
        cluster
    }

    /// Look up a node by name.
    ///
    /// # Panics
    /// If no node has that name.
    pub fn node(&self, name: &str) -> &Arc<Node> {
        self.nodes
            .iter()
            .find(|n| n.address().as_str() == name)
            .unwrap_or_else(|| panic!("no node named {name}"))
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Every running node gossips once with each peer it currently sees live.
    ///
    /// Errors are ignored; their effect shows up in the registries.
    pub async fn gossip_round(&self) {
        for node in &self.nodes {
            if node.is_stopped() {
                continue;
            }
            let targets: Vec<Address> = node
                .registry_snapshot()
                .into_iter()
                .filter(|(addr, entry)| addr != node.address() && !entry.value.removed)
                .map(|(addr, _)| addr)
                .collect();
            for peer in targets {
                let _ = node.gossip_with(&peer).await;
            }
        }
    }

    /// Start every node's background loops.
    pub fn launch_all(&self) -> Result<()> {
        for node in &self.nodes {
            node.launch()?;
        }
        Ok(())
    }

    /// Unregister a node and stop it, as if its process exited.
    pub async fn remove(&self, name: &str) -> Arc<Node> {
        let node = Arc::clone(self.node(name));
        self.network.unregister(node.address()).await;
        node.stop();
        node.join().await;
        node
    }

    /// Stop every node and wait for its tasks.
    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.stop();
        }
        for node in &self.nodes {
            node.join().await;
        }
    }
}

/// Poll `check` until it holds or `timeout` elapses. Returns the final result.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
