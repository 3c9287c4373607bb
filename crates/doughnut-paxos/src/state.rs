//! Per-address acceptor state: the highest proposal promised, and the
//! highest-numbered value accepted so far. Persisted through the `Silo`
//! at a derived key, never in memory only — an acceptor must survive a
//! restart without forgetting what it has promised (SPEC_FULL.md §4.7).

use doughnut_crypto::content_hash;
use doughnut_overlay::{PaxosValue, ProposalId};
use doughnut_types::{Address, AddressFlags, SiloError};
use doughnut_silo::{Silo, WriteMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcceptorState {
    pub promised: Option<ProposalId>,
    pub accepted: Option<(ProposalId, PaxosValue)>,
}

/// The Silo address an address's acceptor bookkeeping lives at, distinct
/// from the address's own block data.
pub fn paxos_key(address: Address) -> Address {
    let hash = content_hash(&[b"PAXOS", &address.to_bytes()]);
    Address::new(hash, AddressFlags::Unflagged)
}

pub async fn load_state(silo: &Arc<dyn Silo>, address: Address) -> Result<AcceptorState, SiloError> {
    match silo.get(&paxos_key(address)).await? {
        Some(bytes) => Ok(bincode::deserialize(&bytes).unwrap_or_default()),
        None => Ok(AcceptorState::default()),
    }
}

pub async fn save_state(silo: &Arc<dyn Silo>, address: Address, state: &AcceptorState) -> Result<(), SiloError> {
    let bytes = bincode::serialize(state).expect("AcceptorState always serializes");
    silo.set(paxos_key(address), bytes, WriteMode::UPSERT).await
}
