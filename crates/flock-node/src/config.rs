//! Node configuration.

use std::time::Duration;

/// Timing configuration for a node's background loops.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Pause between consecutive peer contacts in the anti-entropy loop.
    pub gossip_interval: Duration,
    /// How long a tombstone is kept before it may be deleted.
    pub tombstone_ttl: Duration,
    /// How often expired tombstones are swept.
    pub sweep_interval: Duration,
    /// How often the node re-asserts its own registry entry.
    pub self_heal_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            gossip_interval: Duration::from_millis(300),
            tombstone_ttl: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
            self_heal_interval: Duration::from_secs(1),
        }
    }
}

impl NodeConfig {
    /// Override the anti-entropy pacing.
    pub fn with_gossip_interval(mut self, interval: Duration) -> Self {
        self.gossip_interval = interval;
        self
    }

    /// Override the tombstone TTL.
    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }
}
