//! # Flock Testkit
//!
//! Testing utilities for flock.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Pre-wired clusters on a shared [`ManualClock`](flock_core::ManualClock)
//! - **Generators**: Proptest strategies for versioned values and peer maps
//! - **Helpers**: Polling with a deadline, tracing setup
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use flock_testkit::generators::versioned_int;
//!
//! proptest! {
//!     #[test]
//!     fn merge_is_idempotent(x in versioned_int()) {
//!         prop_assert_eq!(flock_core::lww_merge(&x, &x), x);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use flock_testkit::fixtures::TestCluster;
//!
//! async fn example() {
//!     let cluster = TestCluster::fully_meshed(&["a", "b", "c"]).await;
//!     cluster.node("a").set_local_value(10);
//!     cluster.gossip_round().await;
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{init_tracing, wait_until, TestCluster};
