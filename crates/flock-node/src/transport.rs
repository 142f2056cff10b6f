//! Transport abstraction for gossip.
//!
//! A node depends on exactly two outbound calls: push its value to a peer and
//! exchange peer lists with it. Implementations decide how calls are
//! delivered; they only have to deliver or fail with a [`TransportError`].

use async_trait::async_trait;

use flock_core::{Address, PeerMap, VersionedValue};

use crate::error::TransportError;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// The two-call RPC contract a [`Node`](crate::Node) gossips through.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Push `value` from `from` to `to`.
    async fn push_value(&self, from: &Address, to: &Address, value: VersionedValue<i64>)
        -> Result<()>;

    /// Send `peers` to `to` and return its merged registry.
    async fn exchange_peers(&self, from: &Address, to: &Address, peers: PeerMap)
        -> Result<PeerMap>;
}

/// An in-process delivery mechanism for simulations and tests.
///
/// [`MemoryNetwork`] is an explicit directory of nodes; [`MemoryTransport`]
/// routes a call by looking the destination up and invoking its handlers.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Weak};
    use std::time::Duration;
    use tokio::sync::RwLock;

    use crate::error::NodeError;
    use crate::node::Node;

    /// Directory of every node reachable in one simulated network.
    pub struct MemoryNetwork {
        /// Nodes by address.
        nodes: RwLock<HashMap<Address, Arc<Node>>>,
        /// Every call attempted, successful or not.
        requests: AtomicU64,
        /// Calls still to be failed by [`MemoryNetwork::fail_next`].
        pending_failures: AtomicU64,
        /// Simulated one-way delivery delay.
        latency: Option<Duration>,
    }

    impl MemoryNetwork {
        /// Create an empty network with instant delivery.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create an empty network that delays every call by `latency`.
        pub fn with_latency(latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                latency: Some(latency),
                ..Self::default()
            })
        }

        /// A transport that delivers through this network.
        ///
        /// The transport holds a weak reference, so nodes registered here do
        /// not keep the network alive.
        pub fn transport(self: &Arc<Self>) -> Arc<MemoryTransport> {
            Arc::new(MemoryTransport {
                network: Arc::downgrade(self),
            })
        }

        /// Make `node` reachable. Returns the node it replaced, if any.
        pub async fn register(&self, node: Arc<Node>) -> Option<Arc<Node>> {
            let addr = node.address().clone();
            self.nodes.write().await.insert(addr, node)
        }

        /// Register `node` unless its address is taken. Returns true if added.
        pub async fn register_if_absent(&self, node: Arc<Node>) -> bool {
            let mut nodes = self.nodes.write().await;
            if nodes.contains_key(node.address()) {
                return false;
            }
            nodes.insert(node.address().clone(), node);
            true
        }

        /// Make an address unreachable. Later calls to it fail with `Removed`.
        pub async fn unregister(&self, addr: &Address) -> Option<Arc<Node>> {
            self.nodes.write().await.remove(addr)
        }

        /// Look up a node.
        pub async fn get(&self, addr: &Address) -> Option<Arc<Node>> {
            self.nodes.read().await.get(addr).cloned()
        }

        /// Whether an address is registered.
        pub async fn contains(&self, addr: &Address) -> bool {
            self.nodes.read().await.contains_key(addr)
        }

        /// Every registered address, sorted.
        pub async fn addresses(&self) -> Vec<Address> {
            let mut addrs: Vec<Address> = self.nodes.read().await.keys().cloned().collect();
            addrs.sort();
            addrs
        }

        /// Every registered node, sorted by address.
        pub async fn nodes(&self) -> Vec<Arc<Node>> {
            let mut nodes: Vec<Arc<Node>> = self.nodes.read().await.values().cloned().collect();
            nodes.sort_by(|a, b| a.address().cmp(b.address()));
            nodes
        }

        /// Number of registered nodes.
        pub async fn len(&self) -> usize {
            self.nodes.read().await.len()
        }

        /// Whether no node is registered.
        pub async fn is_empty(&self) -> bool {
            self.nodes.read().await.is_empty()
        }

        /// Total calls attempted through this network.
        pub fn request_count(&self) -> u64 {
            self.requests.load(Ordering::Relaxed)
        }

        /// Fail the next `count` calls with [`TransportError::Failure`].
        pub fn fail_next(&self, count: u64) {
            self.pending_failures.fetch_add(count, Ordering::SeqCst);
        }

        /// Count a call, apply latency, then resolve its destination.
        async fn route(&self, to: &Address) -> Result<Arc<Node>> {
            self.requests.fetch_add(1, Ordering::Relaxed);

            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }

            let injected = self
                .pending_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(TransportError::Failure {
                    peer: to.clone(),
                    reason: "injected fault".into(),
                });
            }

            self.get(to)
                .await
                .ok_or_else(|| TransportError::Removed(to.clone()))
        }
    }

    impl Default for MemoryNetwork {
        fn default() -> Self {
            Self {
                nodes: RwLock::new(HashMap::new()),
                requests: AtomicU64::new(0),
                pending_failures: AtomicU64::new(0),
                latency: None,
            }
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        network: Weak<MemoryNetwork>,
    }

    impl MemoryTransport {
        fn network(&self, to: &Address) -> Result<Arc<MemoryNetwork>> {
            self.network.upgrade().ok_or_else(|| TransportError::Failure {
                peer: to.clone(),
                reason: "network shut down".into(),
            })
        }
    }

    /// Translate a handler rejection into what the caller observes.
    fn delivery_error(to: &Address, err: NodeError) -> TransportError {
        match err {
            NodeError::Unavailable(_) => TransportError::Unavailable(to.clone()),
            NodeError::Stopped(_) => TransportError::Removed(to.clone()),
            NodeError::NoRuntime(_) => TransportError::Failure {
                peer: to.clone(),
                reason: "no runtime at destination".into(),
            },
            NodeError::Transport(inner) => inner,
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn push_value(
            &self,
            _from: &Address,
            to: &Address,
            value: VersionedValue<i64>,
        ) -> Result<()> {
            let node = self.network(to)?.route(to).await?;
            node.handle_set_value(value)
                .map_err(|e| delivery_error(to, e))
        }

        async fn exchange_peers(
            &self,
            from: &Address,
            to: &Address,
            peers: PeerMap,
        ) -> Result<PeerMap> {
            let node = self.network(to)?.route(to).await?;
            node.handle_exchange_peers(from, peers)
                .map_err(|e| delivery_error(to, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use crate::config::NodeConfig;
    use crate::node::Node;
    use flock_core::{ManualClock, Timestamp};
    use std::sync::Arc;

    fn addr(s: &str) -> Address {
        Address::from(s)
    }

    async fn spawn(network: &Arc<MemoryNetwork>, name: &str, clock: &ManualClock) -> Arc<Node> {
        let node = Node::new(
            addr(name),
            network.transport(),
            Arc::new(clock.clone()),
            NodeConfig::default(),
        );
        network.register(node.clone()).await;
        node
    }

    #[tokio::test]
    async fn test_memory_transport_push_value() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let b = spawn(&network, "b", &clock).await;

        let transport = network.transport();
        transport
            .push_value(&addr("a"), &addr("b"), VersionedValue::new(10, Timestamp::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(b.value().value, 10);
        assert_eq!(network.request_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_transport_exchange_peers() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let _b = spawn(&network, "b", &clock).await;

        let mut ours = PeerMap::new();
        ours.insert(
            addr("a"),
            VersionedValue::new(flock_core::PeerRecord::live(addr("a")), Timestamp::from_secs(1)),
        );

        let theirs = network
            .transport()
            .exchange_peers(&addr("a"), &addr("b"), ours)
            .await
            .unwrap();

        assert!(theirs.contains_key(&addr("a")));
        assert!(theirs.contains_key(&addr("b")));
    }

    #[tokio::test]
    async fn test_unknown_destination_is_removed() {
        let network = MemoryNetwork::new();

        let err = network
            .transport()
            .push_value(&addr("a"), &addr("nobody"), VersionedValue::default())
            .await
            .unwrap_err();

        assert_eq!(err, TransportError::Removed(addr("nobody")));
        assert_eq!(network.request_count(), 1);
    }

    #[tokio::test]
    async fn test_dead_destination_is_unavailable() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let b = spawn(&network, "b", &clock).await;
        b.toggle_dead();

        let err = network
            .transport()
            .push_value(&addr("a"), &addr("b"), VersionedValue::default())
            .await
            .unwrap_err();

        assert_eq!(err, TransportError::Unavailable(addr("b")));
    }

    #[tokio::test]
    async fn test_stopped_destination_is_removed() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let b = spawn(&network, "b", &clock).await;
        b.stop();

        let err = network
            .transport()
            .exchange_peers(&addr("a"), &addr("b"), PeerMap::new())
            .await
            .unwrap_err();

        assert_eq!(err, TransportError::Removed(addr("b")));
    }

    #[tokio::test]
    async fn test_fail_next_injects_failures() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let _b = spawn(&network, "b", &clock).await;
        let transport = network.transport();

        network.fail_next(1);
        let err = transport
            .push_value(&addr("a"), &addr("b"), VersionedValue::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Failure { .. }));

        transport
            .push_value(&addr("a"), &addr("b"), VersionedValue::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_network_fails_delivery() {
        let network = MemoryNetwork::new();
        let transport = network.transport();
        drop(network);

        let err = transport
            .push_value(&addr("a"), &addr("b"), VersionedValue::default())
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_directory_listing_is_sorted() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(Timestamp::from_secs(1));
        spawn(&network, "c", &clock).await;
        spawn(&network, "a", &clock).await;
        spawn(&network, "b", &clock).await;

        assert_eq!(network.addresses().await, vec![addr("a"), addr("b"), addr("c")]);
        assert_eq!(network.len().await, 3);

        network.unregister(&addr("b")).await;
        assert!(!network.contains(&addr("b")).await);
    }
}
