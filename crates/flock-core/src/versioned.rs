//! Versioned values and last-write-wins merge.
//!
//! Both the replicated scalar and every peer-registry entry are a
//! [`VersionedValue`], and both are reconciled by the same [`lww_merge`], so
//! the two cannot drift apart in semantics.

use serde::{Deserialize, Serialize};

use crate::types::{Address, Timestamp};

/// A value paired with the time it was written.
///
/// Replaced wholesale on update; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedValue<T> {
    pub value: T,
    pub updated_at: Timestamp,
}

impl<T> VersionedValue<T> {
    /// Create a versioned value.
    pub const fn new(value: T, updated_at: Timestamp) -> Self {
        Self { value, updated_at }
    }

    /// Whether `self` wins against `existing` under last-write-wins.
    ///
    /// Only a strictly later timestamp wins; ties keep the existing value.
    pub fn supersedes(&self, existing: &Self) -> bool {
        self.updated_at > existing.updated_at
    }

    /// Merge `incoming` into `self` in place. Returns true if it replaced `self`.
    pub fn merge_from(&mut self, incoming: Self) -> bool {
        if incoming.supersedes(self) {
            *self = incoming;
            true
        } else {
            false
        }
    }
}

impl<T: Default> Default for VersionedValue<T> {
    fn default() -> Self {
        Self::new(T::default(), Timestamp::ZERO)
    }
}

/// Last-write-wins merge of two versioned values.
///
/// Returns `incoming` if it is strictly newer than `existing`, otherwise
/// `existing`.
pub fn lww_merge<T: Clone>(
    existing: &VersionedValue<T>,
    incoming: &VersionedValue<T>,
) -> VersionedValue<T> {
    if incoming.supersedes(existing) {
        incoming.clone()
    } else {
        existing.clone()
    }
}

/// A membership record: a live peer or a tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerRecord {
    pub address: Address,
    pub removed: bool,
}

impl PeerRecord {
    /// A live record.
    pub fn live(address: Address) -> Self {
        Self {
            address,
            removed: false,
        }
    }

    /// A tombstone.
    pub fn tombstone(address: Address) -> Self {
        Self {
            address,
            removed: true,
        }
    }
}
