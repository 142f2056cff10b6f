//! Background loops: anti-entropy, self-heal, and tombstone sweep.
//!
//! Each loop is an independent tokio task holding an `Arc<Node>`. All of
//! them wake on the node's cancellation token as well as on their own tick,
//! so `stop()` ends them promptly.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::error::Result;
use crate::node::Node;

impl Node {
    /// Start the background loops with the configured gossip interval.
    pub fn launch(self: &Arc<Self>) -> Result<()> {
        self.launch_with_interval(self.config.gossip_interval)
    }

    /// Start the background loops, pacing anti-entropy at `interval`.
    ///
    /// Calling this more than once has no effect. Fails if there is no
    /// runtime to spawn on.
    pub fn launch_with_interval(self: &Arc<Self>, interval: Duration) -> Result<()> {
        let runtime = self.runtime()?;
        if self.launched.swap(true, Ordering::SeqCst) {
            debug!(node = %self.address, "Already launched");
            return Ok(());
        }
        info!(node = %self.address, ?interval, "Launching background loops");

        let node = Arc::clone(self);
        self.track(runtime.spawn(node.anti_entropy_loop(interval)));

        let node = Arc::clone(self);
        self.track(runtime.spawn(node.self_heal_loop()));

        let node = Arc::clone(self);
        self.track(runtime.spawn(node.sweep_loop()));
        Ok(())
    }

    /// Contact every live peer in address order, one per tick, forever.
    async fn anti_entropy_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = ticker(interval);

        'rounds: loop {
            let targets = self.read().registry.live_peers();
            if targets.is_empty() {
                if !self.wait_tick(&mut ticker).await {
                    break;
                }
                continue;
            }

            for peer in targets {
                // Dead nodes keep their place in the rotation until revived.
                while !self.is_alive() {
                    if !self.wait_tick(&mut ticker).await {
                        break 'rounds;
                    }
                }

                // Tombstoned or swept since the round started.
                if !self.read().registry.is_live(&peer) {
                    continue;
                }

                if let Err(err) = self.gossip_with(&peer).await {
                    trace!(node = %self.address, peer = %peer, error = %err, "Round failed");
                }

                if !self.wait_tick(&mut ticker).await {
                    break 'rounds;
                }
            }
        }

        debug!(node = %self.address, "Anti-entropy loop exited");
    }

    async fn self_heal_loop(self: Arc<Self>) {
        let mut ticker = ticker(self.config.self_heal_interval);
        while self.wait_tick(&mut ticker).await {
            self.self_heal();
        }
        debug!(node = %self.address, "Self-heal loop exited");
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut ticker = ticker(self.config.sweep_interval);
        while self.wait_tick(&mut ticker).await {
            self.sweep_expired();
        }
        debug!(node = %self.address, "Sweep loop exited");
    }

    /// Wait for the next tick. Returns false if the node was stopped instead.
    async fn wait_tick(&self, ticker: &mut Interval) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = ticker.tick() => true,
        }
    }
}

/// An interval whose first tick is one full period away.
fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
