//! Convergence verification for a simulated cluster.
//!
//! After gossiping, every running node should report the same replicated
//! value and the same live membership: exactly the nodes registered in the
//! directory.

use std::collections::BTreeSet;

use flock_core::Address;

use crate::cluster::{ClusterSnapshot, NodeSnapshot};

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Every node has identical state.
    Converged,
    /// Nodes have not yet converged (may need more gossip rounds).
    NotConverged { reason: String },
}

impl ConvergenceResult {
    /// Check if nodes have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Verify every node holds the same replicated value and timestamp.
pub fn verify_value_convergence(snapshot: &ClusterSnapshot) -> ConvergenceResult {
    let mut nodes = snapshot.nodes.iter();
    let Some(first) = nodes.next() else {
        return ConvergenceResult::Converged;
    };

    for node in nodes {
        if node.value != first.value {
            return ConvergenceResult::NotConverged {
                reason: format!(
                    "value mismatch: {}={} @{}, {}={} @{}",
                    first.address,
                    first.value.value,
                    first.value.updated_at,
                    node.address,
                    node.value.value,
                    node.value.updated_at
                ),
            };
        }
    }
    ConvergenceResult::Converged
}

/// Verify every node's live membership is exactly the set of cluster nodes.
pub fn verify_membership_convergence(snapshot: &ClusterSnapshot) -> ConvergenceResult {
    let expected: BTreeSet<&Address> = snapshot.nodes.iter().map(|n| &n.address).collect();

    for node in &snapshot.nodes {
        let live = live_members(node);
        if live != expected {
            let missing: Vec<String> = expected.difference(&live).map(|a| a.to_string()).collect();
            let extra: Vec<String> = live.difference(&expected).map(|a| a.to_string()).collect();
            return ConvergenceResult::NotConverged {
                reason: format!(
                    "membership mismatch at {}: missing [{}], extra [{}]",
                    node.address,
                    missing.join(", "),
                    extra.join(", ")
                ),
            };
        }
    }
    ConvergenceResult::Converged
}

/// Verify both value and membership convergence.
pub fn verify_convergence(snapshot: &ClusterSnapshot) -> ConvergenceResult {
    match verify_value_convergence(snapshot) {
        ConvergenceResult::Converged => verify_membership_convergence(snapshot),
        not_converged => not_converged,
    }
}

fn live_members(node: &NodeSnapshot) -> BTreeSet<&Address> {
    node.peers
        .iter()
        .filter(|(_, entry)| !entry.value.removed)
        .map(|(addr, _)| addr)
        .collect()
}
