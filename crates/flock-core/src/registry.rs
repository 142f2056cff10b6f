//! The peer registry: a node's view of cluster membership.
//!
//! Every entry is a [`VersionedValue<PeerRecord>`] keyed by address and
//! reconciled with last-write-wins. Removal is expressed as a tombstone so it
//! can propagate; tombstones are deleted once older than a TTL.
//!
//! ## Invariants
//!
//! - The owner's own address is always present and never tombstoned.
//! - A tombstone is only ever learned for an address already known locally.
//! - Iteration order is sorted by address.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::types::{Address, Timestamp};
use crate::versioned::{PeerRecord, VersionedValue};

/// Registry contents: address -> versioned record, sorted by address.
pub type PeerMap = BTreeMap<Address, VersionedValue<PeerRecord>>;

/// What a [`PeerRegistry::merge`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Addresses learned for the first time.
    pub added: Vec<Address>,
    /// Known addresses whose record was replaced by a newer one.
    pub updated: Vec<Address>,
    /// Tombstones dropped because the address was unknown here.
    pub rejected_tombstones: Vec<Address>,
    /// Whether a tombstone for the owner was refuted.
    pub refuted: bool,
}

impl MergeReport {
    /// Whether the merge changed anything locally.
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.updated.is_empty() || self.refuted
    }
}

/// A node's map of known peers.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    owner: Address,
    peers: PeerMap,
}

impl PeerRegistry {
    /// Create a registry containing only its owner.
    pub fn new(owner: Address, now: Timestamp) -> Self {
        let mut peers = PeerMap::new();
        peers.insert(
            owner.clone(),
            VersionedValue::new(PeerRecord::live(owner.clone()), now),
        );
        Self { owner, peers }
    }

    /// The address this registry belongs to.
    pub fn owner(&self) -> &Address {
        &self.owner
    }

    /// Merge records received from another node.
    ///
    /// Each entry is reconciled with last-write-wins, except that a tombstone
    /// for an unknown address is discarded and a tombstone for the owner is
    /// refuted by re-asserting the owner with a later stamp.
    pub fn merge(&mut self, incoming: PeerMap) -> MergeReport {
        let mut report = MergeReport::default();

        for (addr, record) in incoming {
            if addr == self.owner {
                if record.value.removed {
                    report.refuted |= self.refute(record.updated_at);
                } else if let Some(existing) = self.peers.get_mut(&addr) {
                    existing.merge_from(record);
                }
                continue;
            }

            match self.peers.get_mut(&addr) {
                Some(existing) => {
                    if existing.merge_from(record) {
                        report.updated.push(addr);
                    }
                }
                None if record.value.removed => {
                    report.rejected_tombstones.push(addr);
                }
                None => {
                    self.peers.insert(addr.clone(), record);
                    report.added.push(addr);
                }
            }
        }

        report
    }

    /// Tombstone a known peer, stamped `now`. Returns true if the entry exists.
    ///
    /// Unknown addresses and the owner are left alone.
    pub fn mark_removed(&mut self, addr: &Address, now: Timestamp) -> bool {
        if *addr == self.owner {
            return false;
        }
        match self.peers.get_mut(addr) {
            Some(entry) => {
                let stamp = now.after(entry.updated_at);
                *entry = VersionedValue::new(PeerRecord::tombstone(addr.clone()), stamp);
                true
            }
            None => false,
        }
    }

    /// Learn a peer out-of-band. Returns true if the registry changed.
    ///
    /// Absent addresses are inserted live; a tombstoned entry is revived.
    /// A live entry keeps its current stamp.
    pub fn add_peer(&mut self, addr: Address, now: Timestamp) -> bool {
        match self.peers.get(&addr) {
            Some(entry) if !entry.value.removed => false,
            Some(entry) => {
                let stamp = now.after(entry.updated_at);
                self.peers
                    .insert(addr.clone(), VersionedValue::new(PeerRecord::live(addr), stamp));
                true
            }
            None => {
                self.peers
                    .insert(addr.clone(), VersionedValue::new(PeerRecord::live(addr), now));
                true
            }
        }
    }

    /// Record that `addr` was just reached: set it live, stamped `now`.
    pub fn refresh(&mut self, addr: &Address, now: Timestamp) {
        let stamp = match self.peers.get(addr) {
            Some(entry) => now.after(entry.updated_at),
            None => now,
        };
        self.peers.insert(
            addr.clone(),
            VersionedValue::new(PeerRecord::live(addr.clone()), stamp),
        );
    }

    /// Re-assert the owner's own live entry, stamped `now`.
    pub fn self_heal(&mut self, now: Timestamp) {
        let owner = self.owner.clone();
        self.refresh(&owner, now);
    }

    /// Delete tombstones older than `ttl`. Returns the deleted addresses.
    pub fn sweep_expired(&mut self, ttl: Duration, now: Timestamp) -> Vec<Address> {
        let expired: Vec<Address> = self
            .peers
            .iter()
            .filter(|(_, entry)| entry.value.removed && now.since(entry.updated_at) > ttl)
            .map(|(addr, _)| addr.clone())
            .collect();

        for addr in &expired {
            self.peers.remove(addr);
        }
        expired
    }

    /// An independent copy of every entry.
    pub fn snapshot(&self) -> PeerMap {
        self.peers.clone()
    }

    /// Live peers other than the owner, sorted by address.
    pub fn live_peers(&self) -> Vec<Address> {
        self.peers
            .iter()
            .filter(|(addr, entry)| **addr != self.owner && !entry.value.removed)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Look up one entry.
    pub fn get(&self, addr: &Address) -> Option<&VersionedValue<PeerRecord>> {
        self.peers.get(addr)
    }

    /// Whether `addr` has an entry, live or tombstoned.
    pub fn contains(&self, addr: &Address) -> bool {
        self.peers.contains_key(addr)
    }

    /// Whether `addr` has a live entry.
    pub fn is_live(&self, addr: &Address) -> bool {
        self.peers.get(addr).is_some_and(|entry| !entry.value.removed)
    }

    /// Number of entries including tombstones and the owner.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Always false: the owner is always present.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn refute(&mut self, tombstone_at: Timestamp) -> bool {
        let owner = self.owner.clone();
        let current = self
            .peers
            .get(&owner)
            .map(|entry| entry.updated_at)
            .unwrap_or(Timestamp::ZERO);

        if tombstone_at < current {
            return false;
        }
        self.peers.insert(
            owner.clone(),
            VersionedValue::new(PeerRecord::live(owner), tombstone_at.next()),
        );
        true
    }
}
