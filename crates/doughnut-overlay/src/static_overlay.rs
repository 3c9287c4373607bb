//! A fixed peer table for tests, grounded on `qc-01-peer-discovery::
//! test_utils`-style fakes: no placement logic, just a map callers seed.

use std::collections::HashMap;
use std::sync::Arc;

use doughnut_types::{Address, NodeId};
use futures::stream;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::overlay::{DiscoveryEvent, Location, Overlay, OverlayError, OverlayStream};
use crate::peer::Peer;

/// An `Overlay` whose `lookup`/`allocate` both return every peer in a
/// caller-supplied fixed table, ignoring `address` and `fast` entirely.
/// Enough to let `doughnut-paxos`/`doughnut-local` integration tests run
/// without a real placement algorithm.
pub struct StaticOverlay {
    peers: RwLock<HashMap<NodeId, Arc<dyn Peer>>>,
    events: broadcast::Sender<DiscoveryEvent>,
}

impl StaticOverlay {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            peers: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn insert(&self, id: NodeId, peer: Arc<dyn Peer>) {
        self.peers.write().insert(id, peer);
        let _ = self.events.send(DiscoveryEvent::Discovered(Location {
            id: Some(id),
            endpoints: Vec::new(),
        }));
    }

    pub fn remove(&self, id: NodeId) {
        self.peers.write().remove(&id);
        let _ = self.events.send(DiscoveryEvent::Disappeared(id));
    }
}

impl Default for StaticOverlay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Overlay for StaticOverlay {
    async fn allocate(&self, _address: Address, n: usize) -> OverlayStream {
        let peers: Vec<_> = self.peers.read().values().take(n).cloned().collect();
        Box::pin(stream::iter(peers))
    }

    async fn lookup(&self, _address: Address, n: usize, _fast: bool) -> OverlayStream {
        let peers: Vec<_> = self.peers.read().values().take(n).cloned().collect();
        Box::pin(stream::iter(peers))
    }

    async fn lookup_node(&self, id: NodeId) -> Result<Arc<dyn Peer>, OverlayError> {
        self.peers
            .read()
            .get(&id)
            .cloned()
            .ok_or(OverlayError::NodeNotFound(id))
    }

    async fn discover(&self, _locations: Vec<Location>) {}

    async fn discovered(&self, id: NodeId) -> bool {
        self.peers.read().contains_key(&id)
    }

    fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doughnut_block::{Block, ConsensusError, RemoveSignature};
    use doughnut_types::Address;

    struct NullPeer;

    #[async_trait::async_trait]
    impl Peer for NullPeer {
        async fn store(&self, _block: Block, _mode: crate::peer::StoreMode) -> Result<(), ConsensusError> {
            Ok(())
        }
        async fn fetch(&self, _address: Address, _local_version: Option<u64>) -> Result<Option<Block>, ConsensusError> {
            Ok(None)
        }
        async fn remove(&self, _address: Address, _sig: RemoveSignature) -> Result<(), ConsensusError> {
            Ok(())
        }
        async fn propose(&self, _address: Address, _proposal_id: crate::peer::ProposalId) -> Result<crate::peer::Promise, ConsensusError> {
            unimplemented!()
        }
        async fn accept(&self, _address: Address, _proposal_id: crate::peer::ProposalId, _value: crate::peer::PaxosValue) -> Result<bool, ConsensusError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn lookup_node_finds_seeded_peer() {
        let overlay = StaticOverlay::new();
        let id = NodeId([1u8; 32]);
        overlay.insert(id, Arc::new(NullPeer));
        assert!(overlay.lookup_node(id).await.is_ok());
        assert!(overlay.discovered(id).await);
    }

    #[tokio::test]
    async fn lookup_node_reports_not_found() {
        let overlay = StaticOverlay::new();
        let id = NodeId([2u8; 32]);
        assert!(matches!(
            overlay.lookup_node(id).await,
            Err(OverlayError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn discovery_then_disappearance_are_signaled_in_order() {
        let overlay = StaticOverlay::new();
        let mut rx = overlay.subscribe();
        let id = NodeId([3u8; 32]);
        overlay.insert(id, Arc::new(NullPeer));
        overlay.remove(id);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, DiscoveryEvent::Discovered(_)));
        assert!(matches!(second, DiscoveryEvent::Disappeared(_)));
    }
}
