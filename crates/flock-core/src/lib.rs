//! # Flock Core
//!
//! Pure primitives for flock: versioned values, last-write-wins merge, and
//! the peer registry.
//!
//! This crate contains no I/O, no tasks, no networking. Every operation that
//! depends on time takes `now` as an argument.
//!
//! ## Key Types
//!
//! - [`VersionedValue`] - A value plus the timestamp it was written at
//! - [`PeerRecord`] - A live peer or a tombstone
//! - [`PeerRegistry`] - A node's view of cluster membership
//! - [`Timestamp`] / [`Clock`] - Unix-millisecond stamps and their sources

pub mod clock;
pub mod registry;
pub mod types;
pub mod versioned;

pub use clock::{Clock, ManualClock, SystemClock};
pub use registry::{MergeReport, PeerMap, PeerRegistry};
pub use types::{Address, Timestamp};
pub use versioned::{lww_merge, PeerRecord, VersionedValue};
