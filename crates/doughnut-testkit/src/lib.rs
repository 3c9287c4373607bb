//! In-process two-node harness for the integration tests in
//! `tests/end_to_end.rs`, grounded on
//! `qc-01-peer-discovery::test_utils`/`testing.rs`'s test-double style and
//! `doughnut-paxos::server`'s `three_node_cluster` test helper, scaled to
//! the two-node minimum a Paxos quorum needs (SPEC_FULL.md §4.10).

use std::collections::BTreeSet;
use std::sync::Arc;

use doughnut::Doughnut;
use doughnut_crypto::KeyPair;
use doughnut_local::LocalPeer;
use doughnut_overlay::{Consensus, StaticOverlay};
use doughnut_paxos::{PaxosConfig, PaxosServer};
use doughnut_silo::{MemorySilo, Silo};
use doughnut_types::NodeId;

fn node_id(keys: &KeyPair) -> NodeId {
    NodeId(*keys.public_key().as_bytes())
}

/// Two `PaxosServer`s sharing a `StaticOverlay`, each with their own
/// in-memory `Silo`. A write accepted through either node's `Consensus`
/// handle is visible through the other's.
pub struct TwoNodeCluster {
    pub overlay: Arc<StaticOverlay>,
    pub nodes: [Arc<PaxosServer>; 2],
}

impl TwoNodeCluster {
    pub fn new() -> Self {
        let overlay = Arc::new(StaticOverlay::new());
        let keys = [KeyPair::generate(), KeyPair::generate()];
        let quorum: BTreeSet<NodeId> = keys.iter().map(node_id).collect();

        let nodes: Vec<Arc<PaxosServer>> = keys
            .iter()
            .map(|k| {
                let silo: Arc<dyn Silo> = Arc::new(MemorySilo::new(None));
                let local = Arc::new(LocalPeer::new(silo.clone()));
                PaxosServer::new(node_id(k), local, silo, overlay.clone(), quorum.clone(), PaxosConfig::default())
            })
            .collect();
        for (k, server) in keys.iter().zip(&nodes) {
            overlay.insert(node_id(k), server.clone());
        }

        Self {
            overlay,
            nodes: [nodes[0].clone(), nodes[1].clone()],
        }
    }

    /// A `Doughnut` facade fronting `nodes[index]`'s `Consensus` handle,
    /// owned by a fresh key.
    pub fn facade(&self, index: usize) -> Doughnut {
        let keys = KeyPair::generate();
        let node_id = NodeId(*keys.public_key().as_bytes());
        let consensus: Arc<dyn Consensus> = self.nodes[index].clone();
        Doughnut::new(node_id, keys, None, self.overlay.clone(), consensus)
    }
}

impl Default for TwoNodeCluster {
    fn default() -> Self {
        Self::new()
    }
}
