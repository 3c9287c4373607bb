//! # Local peer
//!
//! Implements `doughnut_overlay::Peer`'s block-storage methods against a
//! `doughnut_silo::Silo` handle: validate, check the replacement rule
//! against whatever's already stored, persist, and broadcast the change.
//! Grounded on `qc-02-block-storage::service::storage`'s shape.
//!
//! `propose`/`accept` — the Paxos acceptor methods also carried by `Peer`
//! — are not implemented here; a bare `LocalPeer` is the degenerate,
//! non-replicated case. `doughnut-paxos::PaxosServer` wraps a `LocalPeer`
//! as its storage backend and is what answers those calls over the wire.

use std::sync::Arc;

use async_trait::async_trait;
use doughnut_block::{Block, ConsensusError, RemoveSignature};
use doughnut_overlay::{Consensus, PaxosValue, Peer, ProposalId, Promise, StoreMode};
use doughnut_silo::{Silo, WriteMode};
use doughnut_types::Address;
use tokio::sync::broadcast;
use tracing::{debug, instrument};

/// Emitted on every successful `store`/`remove`, for components that want
/// to react to local state changes (e.g. a filesystem facade's inode
/// cache invalidation) without polling the Silo.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Stored(Address),
    Removed(Address),
}

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct LocalPeer {
    silo: Arc<dyn Silo>,
    events: broadcast::Sender<StoreEvent>,
}

impl LocalPeer {
    pub fn new(silo: Arc<dyn Silo>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { silo, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    async fn existing(&self, address: &Address) -> Result<Option<Block>, ConsensusError> {
        match self.silo.get(address).await? {
            Some(bytes) => {
                let block: Block =
                    bincode::deserialize(&bytes).map_err(|e| ConsensusError::Transient(e.to_string()))?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Peer for LocalPeer {
    #[instrument(skip(self, block), fields(address = %block.address(), kind = block.kind()))]
    async fn store(&self, block: Block, mode: StoreMode) -> Result<(), ConsensusError> {
        block.validate()?;
        let address = block.address();

        match (self.existing(&address).await?, mode) {
            (Some(current), StoreMode::Insert) => {
                return Err(ConsensusError::Conflict {
                    address,
                    current: Box::new(current),
                })
            }
            (Some(current), StoreMode::Update) => current.validate_replacement(&block)?,
            (None, StoreMode::Update) => return Err(ConsensusError::MissingBlock(address)),
            (None, StoreMode::Insert) => {}
        }

        let bytes = bincode::serialize(&block).map_err(|e| ConsensusError::Transient(e.to_string()))?;
        let write_mode = match mode {
            StoreMode::Insert => WriteMode::INSERT_ONLY,
            StoreMode::Update => WriteMode::UPDATE_ONLY,
        };
        self.silo.set(address, bytes, write_mode).await?;
        debug!("block stored");
        let _ = self.events.send(StoreEvent::Stored(address));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, address: Address, local_version: Option<u64>) -> Result<Option<Block>, ConsensusError> {
        let block = self.existing(&address).await?;
        Ok(match (block, local_version) {
            (Some(block), Some(known)) if block.version() == Some(known) => None,
            (block, _) => block,
        })
    }

    #[instrument(skip(self, sig))]
    async fn remove(&self, address: Address, sig: RemoveSignature) -> Result<(), ConsensusError> {
        let current = self
            .existing(&address)
            .await?
            .ok_or(ConsensusError::MissingBlock(address))?;
        current.validate_remove(sig.signer.as_ref(), &sig)?;
        self.silo.erase(&address).await?;
        debug!("block removed");
        let _ = self.events.send(StoreEvent::Removed(address));
        Ok(())
    }

    async fn propose(&self, _address: Address, _proposal_id: ProposalId) -> Result<Promise, ConsensusError> {
        Err(ConsensusError::Transient(
            "LocalPeer does not act as a Paxos acceptor; wrap it in a PaxosServer".into(),
        ))
    }

    async fn accept(&self, _address: Address, _proposal_id: ProposalId, _value: PaxosValue) -> Result<bool, ConsensusError> {
        Err(ConsensusError::Transient(
            "LocalPeer does not act as a Paxos acceptor; wrap it in a PaxosServer".into(),
        ))
    }
}

#[async_trait]
impl Consensus for LocalPeer {
    async fn store(&self, block: Block, mode: StoreMode) -> Result<(), ConsensusError> {
        Peer::store(self, block, mode).await
    }

    async fn fetch(&self, address: Address, local_version: Option<u64>) -> Result<Option<Block>, ConsensusError> {
        Peer::fetch(self, address, local_version).await
    }

    async fn remove(&self, address: Address, sig: RemoveSignature) -> Result<(), ConsensusError> {
        Peer::remove(self, address, sig).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doughnut_block::Chb;
    use doughnut_silo::MemorySilo;

    fn peer() -> LocalPeer {
        LocalPeer::new(Arc::new(MemorySilo::new(None)))
    }

    #[tokio::test]
    async fn store_then_fetch_roundtrips() {
        let peer = peer();
        let block = Block::Chb(Chb::new(b"hello".to_vec(), None));
        let address = block.address();
        Peer::store(&peer, block.clone(), StoreMode::Insert).await.unwrap();
        let fetched = Peer::fetch(&peer, address, None).await.unwrap().unwrap();
        assert_eq!(fetched.address(), address);
    }

    #[tokio::test]
    async fn inserting_over_an_existing_address_conflicts() {
        let peer = peer();
        let block = Block::Chb(Chb::new(b"hello".to_vec(), None));
        Peer::store(&peer, block.clone(), StoreMode::Insert).await.unwrap();
        let err = Peer::store(&peer, block, StoreMode::Insert).await.unwrap_err();
        assert!(matches!(err, ConsensusError::Conflict { .. }));
    }

    #[tokio::test]
    async fn updating_a_missing_address_fails() {
        let peer = peer();
        let block = Block::Chb(Chb::new(b"hello".to_vec(), None));
        let err = Peer::store(&peer, block, StoreMode::Update).await.unwrap_err();
        assert!(matches!(err, ConsensusError::MissingBlock(_)));
    }

    #[tokio::test]
    async fn remove_requires_a_valid_signature_and_frees_the_address() {
        let peer = peer();
        let block = Block::Chb(Chb::new(b"hello".to_vec(), None));
        let address = block.address();
        Peer::store(&peer, block.clone(), StoreMode::Insert).await.unwrap();

        let sig = block.sign_remove(None).unwrap();
        Peer::remove(&peer, address, sig).await.unwrap();
        assert!(Peer::fetch(&peer, address, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_emits_an_event() {
        let peer = peer();
        let mut events = peer.subscribe();
        let block = Block::Chb(Chb::new(b"hello".to_vec(), None));
        let address = block.address();
        Peer::store(&peer, block, StoreMode::Insert).await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), StoreEvent::Stored(a) if a == address));
    }
}
