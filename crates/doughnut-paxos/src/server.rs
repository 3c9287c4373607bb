//! Single-decree-per-address Paxos: a proposer phase (`run_round`) that
//! drives a quorum to agreement, and an acceptor phase (`handle_propose`/
//! `handle_accept`) that any member — including this node itself — answers
//! over `Peer`. Grounded on `qc-08-consensus`'s validator/quorum domain
//! shape, adapted from multi-round leader election to a one-shot
//! per-address decree.
//!
//! No separate Learner phase: `handle_accept` applies the chosen value to
//! local storage the moment a majority accepts it, collapsing
//! propose/promise/accept/learn into the two round trips `run_round` makes.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use doughnut_block::{Block, ConsensusError, RemoveSignature};
use doughnut_local::LocalPeer;
use doughnut_overlay::{Consensus, Overlay, PaxosValue, Peer, ProposalId, Promise, StoreMode};
use doughnut_silo::{Silo, WriteMode};
use doughnut_types::{Address, NodeId};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::config::PaxosConfig;
use crate::state::{self};

/// Bound on how many times a proposer re-runs a round after losing to a
/// `Quorum` decree before giving up, mirroring `doughnut::Doughnut`'s
/// bounded conflict-resolve retry (SPEC_FULL.md §4.7 step 5).
const MAX_QUORUM_RETRIES: u32 = 3;

/// Drives proposer rounds and answers acceptor RPCs for every address this
/// node takes part in. Wraps a `LocalPeer` for reads and for reconciling
/// with the quorum's local view; applies decreed writes straight to the
/// shared `Silo` so acceptance doesn't re-run `LocalPeer`'s insert/update
/// conflict checks, which are a proposer-side concern, not an acceptor one.
pub struct PaxosServer {
    node_id: NodeId,
    local: Arc<LocalPeer>,
    silo: Arc<dyn Silo>,
    overlay: Arc<dyn Overlay>,
    config: PaxosConfig,
    quorum: Mutex<BTreeSet<NodeId>>,
    misses: Mutex<HashMap<NodeId, u32>>,
    round: AtomicU64,
}

impl PaxosServer {
    pub fn new(
        node_id: NodeId,
        local: Arc<LocalPeer>,
        silo: Arc<dyn Silo>,
        overlay: Arc<dyn Overlay>,
        quorum: BTreeSet<NodeId>,
        config: PaxosConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            local,
            silo,
            overlay,
            config,
            quorum: Mutex::new(quorum),
            misses: Mutex::new(HashMap::new()),
            round: AtomicU64::new(0),
        })
    }

    pub fn quorum_members(&self) -> BTreeSet<NodeId> {
        self.quorum.lock().clone()
    }

    /// Proposes shrinking the quorum to exclude any member whose
    /// consecutive-miss count has crossed `quorum_reconfig_after_misses`
    /// (Open Question 2, SPEC_FULL.md §9). Callers drive this periodically;
    /// a miss alone never auto-triggers a round to avoid reconfiguring
    /// mid-round on the failure that motivated it.
    pub async fn reconfigure_if_needed(&self) -> Result<(), ConsensusError> {
        let offender = {
            let misses = self.misses.lock();
            misses
                .iter()
                .find(|(_, &count)| count >= self.config.quorum_reconfig_after_misses)
                .map(|(id, _)| *id)
        };
        let Some(offender) = offender else {
            return Ok(());
        };
        let mut next = self.quorum_members();
        next.remove(&offender);
        warn!(%offender, "proposing quorum reconfiguration after repeated misses");
        let address = Address::new(offender.0, doughnut_types::AddressFlags::Unflagged);
        self.run_round(address, PaxosValue::Quorum(next)).await?;
        self.misses.lock().remove(&offender);
        Ok(())
    }

    fn note_miss(&self, id: NodeId) {
        *self.misses.lock().entry(id).or_insert(0) += 1;
    }

    fn clear_miss(&self, id: NodeId) {
        self.misses.lock().remove(&id);
    }

    async fn apply(&self, address: Address, value: &PaxosValue) -> Result<(), ConsensusError> {
        match value {
            PaxosValue::Block(block) => {
                block.validate()?;
                let bytes = bincode::serialize(block).map_err(|e| ConsensusError::Transient(e.to_string()))?;
                self.silo.set(address, bytes, WriteMode::UPSERT).await?;
            }
            PaxosValue::Removed(sig) => {
                if let Some(bytes) = self.silo.get(&address).await? {
                    let current: Block =
                        bincode::deserialize(&bytes).map_err(|e| ConsensusError::Transient(e.to_string()))?;
                    current.validate_remove(sig.signer.as_ref(), sig)?;
                    self.silo.erase(&address).await?;
                }
            }
            PaxosValue::Quorum(members) => {
                *self.quorum.lock() = members.clone();
            }
        }
        Ok(())
    }

    async fn handle_propose(&self, address: Address, proposal_id: ProposalId) -> Result<Promise, ConsensusError> {
        let mut acceptor = state::load_state(&self.silo, address).await?;
        if let Some(promised) = acceptor.promised {
            if proposal_id <= promised {
                return Err(ConsensusError::Transient(format!(
                    "stale proposal {proposal_id:?}: already promised {promised:?}"
                )));
            }
        }
        acceptor.promised = Some(proposal_id);
        let promise = Promise {
            proposal_id,
            previously_accepted: acceptor.accepted.clone(),
        };
        state::save_state(&self.silo, address, &acceptor).await?;
        Ok(promise)
    }

    async fn handle_accept(
        &self,
        address: Address,
        proposal_id: ProposalId,
        value: PaxosValue,
    ) -> Result<bool, ConsensusError> {
        let mut acceptor = state::load_state(&self.silo, address).await?;
        if let Some(promised) = acceptor.promised {
            if proposal_id < promised {
                return Ok(false);
            }
        }
        acceptor.promised = Some(proposal_id);
        acceptor.accepted = Some((proposal_id, value.clone()));
        state::save_state(&self.silo, address, &acceptor).await?;
        self.apply(address, &value).await?;
        Ok(true)
    }

    async fn call_propose(&self, id: NodeId, address: Address, proposal_id: ProposalId) -> Result<Promise, ConsensusError> {
        if id == self.node_id {
            return self.handle_propose(address, proposal_id).await;
        }
        let peer = self
            .overlay
            .lookup_node(id)
            .await
            .map_err(|_| ConsensusError::NodeNotFound(id))?;
        peer.propose(address, proposal_id).await
    }

    async fn call_accept(
        &self,
        id: NodeId,
        address: Address,
        proposal_id: ProposalId,
        value: PaxosValue,
    ) -> Result<bool, ConsensusError> {
        if id == self.node_id {
            return self.handle_accept(address, proposal_id, value).await;
        }
        let peer = self
            .overlay
            .lookup_node(id)
            .await
            .map_err(|_| ConsensusError::NodeNotFound(id))?;
        peer.accept(address, proposal_id, value).await
    }

    #[instrument(skip(self, value), fields(%address))]
    async fn run_round(&self, address: Address, value: PaxosValue) -> Result<PaxosValue, ConsensusError> {
        let mut backoff = self.config.backoff_base;
        let mut last_err = ConsensusError::Transient("paxos round never attempted".into());
        for attempt in 0..self.config.max_retries {
            match self.try_round(address, value.clone()).await {
                Ok(chosen) => return Ok(chosen),
                Err(e @ ConsensusError::TooFewPeers { .. }) => return Err(e),
                Err(e) => {
                    last_err = e;
                    if attempt + 1 < self.config.max_retries {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(self.config.backoff_max);
                    }
                }
            }
        }
        Err(last_err)
    }

    async fn try_round(&self, address: Address, value: PaxosValue) -> Result<PaxosValue, ConsensusError> {
        let proposal_id = ProposalId(self.round.fetch_add(1, Ordering::Relaxed), self.node_id);
        let members: Vec<NodeId> = self.quorum_members().into_iter().collect();
        let need = members.len() / 2 + 1;

        let mut promises = Vec::new();
        for &id in &members {
            match self.call_propose(id, address, proposal_id).await {
                Ok(p) => {
                    self.clear_miss(id);
                    promises.push(p);
                }
                Err(e) => {
                    self.note_miss(id);
                    debug!(%id, %e, "propose failed");
                }
            }
        }
        if promises.len() < need {
            return Err(ConsensusError::TooFewPeers {
                need,
                have: promises.len(),
            });
        }

        let chosen = promises
            .into_iter()
            .filter_map(|p| p.previously_accepted)
            .max_by_key(|(id, _)| *id)
            .map(|(_, v)| v)
            .unwrap_or(value);

        let mut accepted = 0;
        for &id in &members {
            match self.call_accept(id, address, proposal_id, chosen.clone()).await {
                Ok(true) => {
                    self.clear_miss(id);
                    accepted += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    self.note_miss(id);
                    debug!(%id, %e, "accept failed");
                }
            }
        }
        if accepted < need {
            return Err(ConsensusError::Transient(format!(
                "accept phase did not reach a majority: {accepted}/{need}"
            )));
        }
        Ok(chosen)
    }
}

#[async_trait]
impl Peer for PaxosServer {
    #[instrument(skip(self, block), fields(address = %block.address(), kind = block.kind()))]
    async fn store(&self, block: Block, mode: StoreMode) -> Result<(), ConsensusError> {
        block.validate()?;
        let address = block.address();

        if mode == StoreMode::Insert {
            if let Some(current) = Peer::fetch(&*self.local, address, None).await? {
                return Err(ConsensusError::Conflict {
                    address,
                    current: Box::new(current),
                });
            }
        }

        for _ in 0..MAX_QUORUM_RETRIES {
            match self.run_round(address, PaxosValue::Block(block.clone())).await? {
                PaxosValue::Block(ref chosen_block)
                    if bincode::serialize(chosen_block).ok() == bincode::serialize(&block).ok() =>
                {
                    return Ok(());
                }
                PaxosValue::Block(other) => {
                    return Err(ConsensusError::Conflict {
                        address,
                        current: Box::new(other),
                    });
                }
                PaxosValue::Quorum(members) => {
                    // SPEC_FULL.md §4.7 step 5: the winner was a quorum
                    // reconfiguration, not our block. Adopt it and retry
                    // the whole round against the new membership.
                    *self.quorum.lock() = members;
                }
                PaxosValue::Removed(_) => {
                    return Err(ConsensusError::Transient(
                        "paxos decreed a tombstone for a block store".into(),
                    ));
                }
            }
        }
        Err(ConsensusError::Transient(
            "quorum kept reconfiguring before the block could be decreed".into(),
        ))
    }

    async fn fetch(&self, address: Address, local_version: Option<u64>) -> Result<Option<Block>, ConsensusError> {
        Peer::fetch(&*self.local, address, local_version).await
    }

    #[instrument(skip(self, sig))]
    async fn remove(&self, address: Address, sig: RemoveSignature) -> Result<(), ConsensusError> {
        for _ in 0..MAX_QUORUM_RETRIES {
            match self.run_round(address, PaxosValue::Removed(sig.clone())).await? {
                PaxosValue::Quorum(members) => {
                    *self.quorum.lock() = members;
                }
                _ => return Ok(()),
            }
        }
        Err(ConsensusError::Transient(
            "quorum kept reconfiguring before the removal could be decreed".into(),
        ))
    }

    async fn propose(&self, address: Address, proposal_id: ProposalId) -> Result<Promise, ConsensusError> {
        self.handle_propose(address, proposal_id).await
    }

    async fn accept(&self, address: Address, proposal_id: ProposalId, value: PaxosValue) -> Result<bool, ConsensusError> {
        self.handle_accept(address, proposal_id, value).await
    }
}

#[async_trait]
impl Consensus for PaxosServer {
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
    use doughnut_overlay::StaticOverlay;
    use doughnut_silo::MemorySilo;

    fn node(id: u8) -> NodeId {
        NodeId([id; 32])
    }

    fn make_server(id: NodeId, overlay: Arc<StaticOverlay>, quorum: BTreeSet<NodeId>) -> Arc<PaxosServer> {
        let silo: Arc<dyn Silo> = Arc::new(MemorySilo::new(None));
        let local = Arc::new(LocalPeer::new(silo.clone()));
        PaxosServer::new(id, local, silo, overlay, quorum, PaxosConfig::default())
    }

    fn three_node_cluster() -> (Arc<StaticOverlay>, Vec<Arc<PaxosServer>>) {
        let overlay = Arc::new(StaticOverlay::new());
        let ids: Vec<NodeId> = (1..=3).map(node).collect();
        let quorum: BTreeSet<NodeId> = ids.iter().copied().collect();
        let servers: Vec<_> = ids
            .iter()
            .map(|&id| make_server(id, overlay.clone(), quorum.clone()))
            .collect();
        for (id, server) in ids.iter().zip(&servers) {
            overlay.insert(*id, server.clone());
        }
        (overlay, servers)
    }

    #[tokio::test]
    async fn store_replicates_to_the_quorum_and_every_node_agrees_on_fetch() {
        let (_overlay, servers) = three_node_cluster();
        let block = Block::Chb(Chb::new(b"hello".to_vec(), None));
        let address = block.address();

        Peer::store(servers[0].as_ref(), block.clone(), StoreMode::Insert).await.unwrap();

        for server in &servers {
            let fetched = Peer::fetch(server.as_ref(), address, None).await.unwrap().unwrap();
            assert_eq!(fetched.address(), address);
        }
    }

    #[tokio::test]
    async fn inserting_over_an_existing_address_conflicts() {
        let (_overlay, servers) = three_node_cluster();
        let block = Block::Chb(Chb::new(b"hello".to_vec(), None));
        Peer::store(servers[0].as_ref(), block.clone(), StoreMode::Insert).await.unwrap();

        let err = Peer::store(servers[1].as_ref(), block, StoreMode::Insert).await.unwrap_err();
        assert!(matches!(err, ConsensusError::Conflict { .. }));
    }

    #[tokio::test]
    async fn remove_clears_the_block_on_every_node() {
        let (_overlay, servers) = three_node_cluster();
        let block = Block::Chb(Chb::new(b"hello".to_vec(), None));
        let address = block.address();
        Peer::store(servers[0].as_ref(), block.clone(), StoreMode::Insert).await.unwrap();

        let sig = block.sign_remove(None).unwrap();
        Peer::remove(servers[0].as_ref(), address, sig).await.unwrap();

        for server in &servers {
            assert!(Peer::fetch(server.as_ref(), address, None).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn a_proposer_that_can_only_reach_itself_cannot_reach_a_majority_of_three() {
        let (overlay, servers) = three_node_cluster();
        overlay.remove(node(2));
        overlay.remove(node(3));

        let block = Block::Chb(Chb::new(b"hello".to_vec(), None));
        let err = Peer::store(servers[0].as_ref(), block, StoreMode::Insert).await.unwrap_err();
        assert!(matches!(err, ConsensusError::TooFewPeers { .. }));
    }
}
