//! The gossip node state machine.
//!
//! A [`Node`] owns its peer registry and its replicated value behind a single
//! lock. Other nodes reach it only through the inbound handlers, which the
//! transport layer invokes; its own background loops (see `gossip.rs`) reach
//! other nodes only through its [`Transport`]. The local lock is never held
//! across a transport call.
//!
//! ## Liveness
//!
//! - **Alive**: handlers accept updates, the anti-entropy loop gossips.
//! - **Dead**: handlers fail with [`NodeError::Unavailable`]; the loop idles.
//! - **Stopped**: terminal. Handlers fail with [`NodeError::Stopped`] and
//!   every background task exits.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flock_core::{Address, Clock, PeerMap, PeerRegistry, Timestamp, VersionedValue};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result, TransportError};
use crate::transport::Transport;

/// State guarded by the node lock.
pub(crate) struct NodeState {
    pub(crate) registry: PeerRegistry,
    pub(crate) value: VersionedValue<i64>,
    pub(crate) dead: bool,
    /// Bumped by every liveness command so a stale revival timer can tell
    /// it has been overtaken.
    pub(crate) liveness_epoch: u64,
}

/// A gossip participant.
pub struct Node {
    pub(crate) address: Address,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: NodeConfig,
    pub(crate) state: RwLock<NodeState>,
    pub(crate) cancel: CancellationToken,
    /// Runtime the node was created on, if any.
    pub(crate) runtime: Option<Handle>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) launched: AtomicBool,
}

impl Node {
    /// Create a node whose registry contains only itself.
    ///
    /// Nothing runs until [`Node::launch`] is called. If this is called
    /// inside a tokio runtime, later spawns go to that runtime even when
    /// triggered from a plain thread.
    pub fn new(
        address: Address,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: NodeConfig,
    ) -> Arc<Self> {
        let registry = PeerRegistry::new(address.clone(), clock.now());
        Arc::new(Self {
            address,
            transport,
            clock,
            config,
            state: RwLock::new(NodeState {
                registry,
                value: VersionedValue::new(0, Timestamp::ZERO),
                dead: false,
                liveness_epoch: 0,
            }),
            cancel: CancellationToken::new(),
            runtime: Handle::try_current().ok(),
            tasks: Mutex::new(Vec::new()),
            launched: AtomicBool::new(false),
        })
    }

    /// This node's address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// This node's configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound handlers
    // ─────────────────────────────────────────────────────────────────────────

    /// Receive a pushed value. Older values are silently ignored.
    pub fn handle_set_value(&self, incoming: VersionedValue<i64>) -> Result<()> {
        let mut state = self.accepting()?;
        if state.value.merge_from(incoming) {
            debug!(
                node = %self.address,
                value = state.value.value,
                at = %state.value.updated_at,
                "Adopted newer value"
            );
        }
        Ok(())
    }

    /// Receive a peer list and answer with the merged local registry.
    pub fn handle_exchange_peers(&self, from: &Address, incoming: PeerMap) -> Result<PeerMap> {
        let mut state = self.accepting()?;
        let report = state.registry.merge(incoming);
        if report.changed() {
            debug!(
                node = %self.address,
                from = %from,
                added = report.added.len(),
                updated = report.updated.len(),
                refuted = report.refuted,
                "Merged peer list"
            );
        }
        Ok(state.registry.snapshot())
    }

    /// Take the write lock if the node is serving requests.
    fn accepting(&self) -> Result<RwLockWriteGuard<'_, NodeState>> {
        if self.cancel.is_cancelled() {
            return Err(NodeError::Stopped(self.address.clone()));
        }
        let state = self.write();
        if state.dead {
            return Err(NodeError::Unavailable(self.address.clone()));
        }
        Ok(state)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbound gossip
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one anti-entropy round trip with `peer`.
    ///
    /// Pushes the local value, exchanges peer lists, merges the answer, and
    /// refreshes the peer's entry. A permanent transport failure tombstones
    /// the peer; a transient one leaves the registry untouched.
    pub async fn gossip_with(&self, peer: &Address) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(NodeError::Stopped(self.address.clone()));
        }
        let (value, peers) = {
            let state = self.read();
            if state.dead {
                return Err(NodeError::Unavailable(self.address.clone()));
            }
            (state.value.clone(), state.registry.snapshot())
        };

        if let Err(err) = self.transport.push_value(&self.address, peer, value).await {
            self.contact_failed(peer, &err);
            return Err(err.into());
        }

        let theirs = match self.transport.exchange_peers(&self.address, peer, peers).await {
            Ok(theirs) => theirs,
            Err(err) => {
                self.contact_failed(peer, &err);
                return Err(err.into());
            }
        };

        let now = self.clock.now();
        let report = {
            let mut state = self.write();
            let report = state.registry.merge(theirs);
            state.registry.refresh(peer, now);
            report
        };

        debug!(
            node = %self.address,
            peer = %peer,
            added = report.added.len(),
            updated = report.updated.len(),
            "Gossip round complete"
        );
        Ok(())
    }

    fn contact_failed(&self, peer: &Address, err: &TransportError) {
        if err.is_permanent() {
            if self.mark_removed(peer) {
                warn!(node = %self.address, peer = %peer, error = %err, "Tombstoned peer");
            }
        } else {
            debug!(node = %self.address, peer = %peer, error = %err, "Peer unavailable, skipping");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Write the replicated value locally, stamped by this node's clock.
    pub fn set_local_value(&self, value: i64) -> VersionedValue<i64> {
        let now = self.clock.now();
        let mut state = self.write();
        let stamp = now.after(state.value.updated_at);
        state.value = VersionedValue::new(value, stamp);
        state.value.clone()
    }

    /// Seed a peer out-of-band. Returns true if the registry changed.
    pub fn add_peer(&self, peer: Address) -> bool {
        let now = self.clock.now();
        self.write().registry.add_peer(peer, now)
    }

    /// Tombstone a known peer. Returns true if the peer was known.
    pub fn mark_removed(&self, peer: &Address) -> bool {
        let now = self.clock.now();
        self.write().registry.mark_removed(peer, now)
    }

    /// Re-assert this node's own registry entry.
    pub fn self_heal(&self) {
        let now = self.clock.now();
        self.write().registry.self_heal(now);
    }

    /// Delete tombstones older than the configured TTL.
    pub fn sweep_expired(&self) -> Vec<Address> {
        let now = self.clock.now();
        let swept = self
            .write()
            .registry
            .sweep_expired(self.config.tombstone_ttl, now);
        if !swept.is_empty() {
            debug!(node = %self.address, count = swept.len(), "Swept expired tombstones");
        }
        swept
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Liveness
    // ─────────────────────────────────────────────────────────────────────────

    /// Flip between Alive and Dead. Returns whether the node is now alive.
    pub fn toggle_dead(&self) -> bool {
        let mut state = self.write();
        state.dead = !state.dead;
        state.liveness_epoch += 1;
        info!(node = %self.address, alive = !state.dead, "Toggled liveness");
        !state.dead
    }

    /// Make the node Dead now and revive it after `duration`.
    ///
    /// A later `kill` or `toggle_dead` overrides a pending revival.
    /// Fails without changing liveness if there is no runtime to run the
    /// revival timer on.
    pub fn kill(self: &Arc<Self>, duration: Duration) -> Result<()> {
        let runtime = self.runtime()?;
        let epoch = {
            let mut state = self.write();
            state.dead = true;
            state.liveness_epoch += 1;
            state.liveness_epoch
        };
        info!(node = %self.address, ?duration, "Killed");

        let node = Arc::clone(self);
        let handle = runtime.spawn(async move {
            tokio::select! {
                _ = node.cancel.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    let mut state = node.write();
                    if state.liveness_epoch == epoch {
                        state.dead = false;
                        info!(node = %node.address, "Revived");
                    }
                }
            }
        });
        self.track(handle);
        Ok(())
    }

    /// Whether the node accepts inbound calls.
    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled() && !self.read().dead
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Stop the node permanently. Every background task exits.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!(node = %self.address, "Stopping");
        }
        self.cancel.cancel();
    }

    /// Whether [`Node::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for every spawned task to finish. Call after [`Node::stop`].
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(node = %self.address, error = %e, "Background task failed");
            }
        }
    }

    /// The runtime to spawn background work on.
    pub(crate) fn runtime(&self) -> Result<Handle> {
        self.runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or_else(|| NodeError::NoRuntime(self.address.clone()))
    }

    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// A copy of the replicated value.
    pub fn value(&self) -> VersionedValue<i64> {
        self.read().value.clone()
    }

    /// A copy of the peer registry.
    pub fn registry_snapshot(&self) -> PeerMap {
        self.read().registry.snapshot()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, NodeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, NodeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("alive", &self.is_alive())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flock_core::ManualClock;
    use std::sync::Mutex as StdMutex;

    /// Answers every call with a fixed outcome and records what it saw.
    struct ScriptedTransport {
        push: std::result::Result<(), TransportError>,
        exchange: std::result::Result<PeerMap, TransportError>,
        pushed: StdMutex<Vec<(Address, VersionedValue<i64>)>>,
    }

    impl ScriptedTransport {
        fn ok(answer: PeerMap) -> Arc<Self> {
            Arc::new(Self {
                push: Ok(()),
                exchange: Ok(answer),
                pushed: StdMutex::new(Vec::new()),
            })
        }

        fn failing(err: TransportError) -> Arc<Self> {
            Arc::new(Self {
                push: Err(err.clone()),
                exchange: Err(err),
                pushed: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn push_value(
            &self,
            _from: &Address,
            to: &Address,
            value: VersionedValue<i64>,
        ) -> crate::transport::Result<()> {
            self.pushed.lock().unwrap().push((to.clone(), value));
            self.push.clone()
        }

        async fn exchange_peers(
            &self,
            _from: &Address,
            _to: &Address,
            _peers: PeerMap,
        ) -> crate::transport::Result<PeerMap> {
            self.exchange.clone()
        }
    }

    fn addr(s: &str) -> Address {
        Address::from(s)
    }

    fn node_with(transport: Arc<dyn Transport>, clock: &ManualClock) -> Arc<Node> {
        Node::new(
            addr("a"),
            transport,
            Arc::new(clock.clone()),
            NodeConfig::default(),
        )
    }

    #[test]
    fn test_new_node_knows_itself() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let node = node_with(ScriptedTransport::ok(PeerMap::new()), &clock);

        let snap = node.registry_snapshot();
        assert_eq!(snap.len(), 1);
        assert!(!snap[&addr("a")].value.removed);
        assert_eq!(node.value(), VersionedValue::new(0, Timestamp::ZERO));
        assert!(node.is_alive());
    }

    #[test]
    fn test_handle_set_value_lww() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let node = node_with(ScriptedTransport::ok(PeerMap::new()), &clock);

        node.handle_set_value(VersionedValue::new(10, Timestamp::from_secs(5)))
            .unwrap();
        node.handle_set_value(VersionedValue::new(3, Timestamp::from_secs(4)))
            .unwrap();

        assert_eq!(node.value().value, 10);
    }

    #[test]
    fn test_dead_node_rejects_without_mutation() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let node = node_with(ScriptedTransport::ok(PeerMap::new()), &clock);
        assert!(!node.toggle_dead());

        let before_value = node.value();
        let before_registry = node.registry_snapshot();

        let err = node
            .handle_set_value(VersionedValue::new(10, Timestamp::from_secs(5)))
            .unwrap_err();
        assert_eq!(err, NodeError::Unavailable(addr("a")));

        let mut incoming = PeerMap::new();
        incoming.insert(
            addr("b"),
            VersionedValue::new(flock_core::PeerRecord::live(addr("b")), Timestamp::from_secs(2)),
        );
        let err = node.handle_exchange_peers(&addr("b"), incoming).unwrap_err();
        assert_eq!(err, NodeError::Unavailable(addr("a")));

        assert_eq!(node.value(), before_value);
        assert_eq!(node.registry_snapshot(), before_registry);

        assert!(node.toggle_dead());
        node.handle_set_value(VersionedValue::new(10, Timestamp::from_secs(5)))
            .unwrap();
        assert_eq!(node.value().value, 10);
    }

    #[test]
    fn test_exchange_returns_merged_registry() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let node = node_with(ScriptedTransport::ok(PeerMap::new()), &clock);

        let mut incoming = PeerMap::new();
        incoming.insert(
            addr("b"),
            VersionedValue::new(flock_core::PeerRecord::live(addr("b")), Timestamp::from_secs(2)),
        );
        let answer = node.handle_exchange_peers(&addr("b"), incoming).unwrap();

        assert!(answer.contains_key(&addr("a")));
        assert!(answer.contains_key(&addr("b")));
    }

    #[tokio::test]
    async fn test_gossip_with_pushes_and_refreshes() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let mut answer = PeerMap::new();
        answer.insert(
            addr("c"),
            VersionedValue::new(flock_core::PeerRecord::live(addr("c")), Timestamp::from_secs(1)),
        );
        let transport = ScriptedTransport::ok(answer);
        let node = node_with(transport.clone(), &clock);
        node.add_peer(addr("b"));
        node.set_local_value(7);

        clock.set(Timestamp::from_secs(9));
        node.gossip_with(&addr("b")).await.unwrap();

        let pushed = transport.pushed.lock().unwrap().clone();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, addr("b"));
        assert_eq!(pushed[0].1.value, 7);

        let snap = node.registry_snapshot();
        assert_eq!(snap[&addr("b")].updated_at, Timestamp::from_secs(9));
        assert!(snap.contains_key(&addr("c")));
    }

    #[tokio::test]
    async fn test_permanent_failure_tombstones_peer() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let transport = ScriptedTransport::failing(TransportError::Failure {
            peer: addr("b"),
            reason: "unreachable".into(),
        });
        let node = node_with(transport, &clock);
        node.add_peer(addr("b"));

        clock.set(Timestamp::from_secs(50));
        let err = node.gossip_with(&addr("b")).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(TransportError::Failure { .. })));

        let entry = node.registry_snapshot()[&addr("b")].clone();
        assert!(entry.value.removed);
        assert_eq!(entry.updated_at, Timestamp::from_secs(50));
    }

    #[tokio::test]
    async fn test_unavailable_peer_is_not_tombstoned() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let transport = ScriptedTransport::failing(TransportError::Unavailable(addr("b")));
        let node = node_with(transport, &clock);
        node.add_peer(addr("b"));

        let err = node.gossip_with(&addr("b")).await.unwrap_err();
        assert_eq!(
            err,
            NodeError::Transport(TransportError::Unavailable(addr("b")))
        );
        assert!(!node.registry_snapshot()[&addr("b")].value.removed);
    }

    #[tokio::test]
    async fn test_dead_node_does_not_gossip() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let transport = ScriptedTransport::ok(PeerMap::new());
        let node = node_with(transport.clone(), &clock);
        node.add_peer(addr("b"));
        node.toggle_dead();

        let err = node.gossip_with(&addr("b")).await.unwrap_err();
        assert_eq!(err, NodeError::Unavailable(addr("a")));
        assert!(transport.pushed.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_revives_after_duration() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let node = node_with(ScriptedTransport::ok(PeerMap::new()), &clock);

        node.kill(Duration::from_secs(2)).unwrap();
        assert!(!node.is_alive());

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(!node.is_alive());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(node.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_kill_overrides_pending_revival() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let node = node_with(ScriptedTransport::ok(PeerMap::new()), &clock);

        node.kill(Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        node.kill(Duration::from_secs(5)).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!node.is_alive(), "first timer must not revive");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(node.is_alive());
    }

    #[test]
    fn test_kill_without_runtime_fails_cleanly() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let node = node_with(ScriptedTransport::ok(PeerMap::new()), &clock);
        node.toggle_dead();
        node.toggle_dead();

        let err = node.kill(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, NodeError::NoRuntime(addr("a")));
        assert!(node.is_alive());
    }

    #[test]
    fn test_kill_from_plain_thread_uses_creation_runtime() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let node = {
            let _guard = rt.enter();
            node_with(ScriptedTransport::ok(PeerMap::new()), &clock)
        };

        node.kill(Duration::from_millis(10)).unwrap();
        assert!(!node.is_alive());

        rt.block_on(async { tokio::time::sleep(Duration::from_millis(100)).await });
        assert!(node.is_alive());
    }

    #[tokio::test]
    async fn test_failure_tombstones_the_contacted_peer() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        // The error names some other address; the called peer is what counts.
        let transport = ScriptedTransport::failing(TransportError::Removed(addr("relay")));
        let node = node_with(transport, &clock);
        node.add_peer(addr("b"));
        node.add_peer(addr("relay"));

        node.gossip_with(&addr("b")).await.unwrap_err();

        let snap = node.registry_snapshot();
        assert!(snap[&addr("b")].value.removed);
        assert!(!snap[&addr("relay")].value.removed);
    }

    #[tokio::test]
    async fn test_stopped_node_rejects_handlers() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let node = node_with(ScriptedTransport::ok(PeerMap::new()), &clock);

        node.stop();
        node.join().await;

        assert!(node.is_stopped());
        assert!(!node.is_alive());
        let err = node
            .handle_set_value(VersionedValue::new(1, Timestamp::from_secs(2)))
            .unwrap_err();
        assert_eq!(err, NodeError::Stopped(addr("a")));
    }

    #[test]
    fn test_local_value_supersedes_same_millisecond() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        let node = node_with(ScriptedTransport::ok(PeerMap::new()), &clock);

        let first = node.set_local_value(1);
        let second = node.set_local_value(2);

        assert!(second.updated_at > first.updated_at);
        assert_eq!(node.value().value, 2);
    }

    #[test]
    fn test_sweep_uses_configured_ttl() {
        let clock = ManualClock::new(Timestamp::from_secs(100));
        let node = node_with(ScriptedTransport::ok(PeerMap::new()), &clock);
        node.add_peer(addr("b"));
        node.mark_removed(&addr("b"));

        clock.set(Timestamp::from_secs(104));
        assert!(node.sweep_expired().is_empty());

        clock.set(Timestamp::from_secs(106));
        assert_eq!(node.sweep_expired(), vec![addr("b")]);
    }
}
