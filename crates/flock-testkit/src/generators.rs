//! Proptest generators for property-based testing.

use proptest::prelude::*;

use flock_core::{Address, PeerMap, PeerRecord, Timestamp, VersionedValue};

/// Generate an address from a small alphabet so generated maps overlap.
pub fn address() -> impl Strategy<Value = Address> {
    "[a-h]".prop_map(Address::from)
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    (0i64..=1_000_000).prop_map(Timestamp::from_millis)
}

/// Generate a versioned integer.
pub fn versioned_int() -> impl Strategy<Value = VersionedValue<i64>> {
    (any::<i64>(), timestamp()).prop_map(|(value, at)| VersionedValue::new(value, at))
}

/// Generate a registry entry, live or tombstoned.
pub fn peer_entry() -> impl Strategy<Value = (Address, VersionedValue<PeerRecord>)> {
    (address(), any::<bool>(), timestamp()).prop_map(|(addr, removed, at)| {
        let record = PeerRecord {
            address: addr.clone(),
            removed,
        };
        (addr, VersionedValue::new(record, at))
    })
}

/// Generate a peer map with up to `max_len` entries.
pub fn peer_map(max_len: usize) -> impl Strategy<Value = PeerMap> {
    prop::collection::vec(peer_entry(), 0..=max_len).prop_map(|v| v.into_iter().collect())
}

/// Generate a peer map with no tombstones.
pub fn live_peer_map(max_len: usize) -> impl Strategy<Value = PeerMap> {
    prop::collection::vec((address(), timestamp()), 0..=max_len).prop_map(|v| {
        v.into_iter()
            .map(|(addr, at)| {
                let record = PeerRecord::live(addr.clone());
                (addr, VersionedValue::new(record, at))
            })
            .collect()
    })
}
