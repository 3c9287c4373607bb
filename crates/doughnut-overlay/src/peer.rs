//! The RPC contract a remote or local peer exposes: block storage plus
//! Paxos acceptor methods (SPEC_FULL.md §4.6/§4.7).
//!
//! This lives in `doughnut-overlay` rather than `doughnut-dock` or
//! `doughnut-paxos` to break what would otherwise be a dependency cycle:
//! `doughnut-paxos` needs to call `Peer` on acceptors it finds via
//! `Overlay::lookup`, and `doughnut-dock`/`doughnut-local` need to
//! *implement* `Peer`. Putting the shared contract in the overlay crate
//! (already the thing both sides depend on to find peers) means neither
//! transport nor consensus depends on the other. Documented as an Open
//! Question resolution in DESIGN.md.

use std::collections::BTreeSet;

use doughnut_block::{Block, ConsensusError};
pub use doughnut_block::RemoveSignature;
use doughnut_types::{Address, NodeId};
use serde::{Deserialize, Serialize};

/// Whether a `store` call is allowed to create a brand-new address or must
/// be replacing an existing one (SPEC_FULL.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreMode {
    Insert,
    Update,
}

/// `(round, proposer)`, compared lexicographically so ties break on node
/// id — the newtype-with-derived-ordering idiom `qc-01-peer-
/// discovery::domain::Distance` uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalId(pub u64, pub NodeId);

/// The value a Paxos decree converges on for one address: a block write, a
/// removal, or a quorum reconfiguration (SPEC_FULL.md §4.7). `Removed` is
/// the "normal removed-block sentinel" spec.md §4.7 describes — deliberately
/// not a `Block::Tombstone` variant, since a tombstone is a fact about an
/// address's consensus history, not a new kind of block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PaxosValue {
    Block(Block),
    Removed(RemoveSignature),
    Quorum(BTreeSet<NodeId>),
}

/// An acceptor's response to `propose`: whether it has already accepted
/// something at a higher-or-equal proposal, and if so what.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promise {
    pub proposal_id: ProposalId,
    pub previously_accepted: Option<(ProposalId, PaxosValue)>,
}

/// Everything a peer — local or remote — can be asked to do. `doughnut-
/// local::LocalPeer` implements this against a `Silo`; `doughnut-dock`
/// implements it by serializing calls over a `Connection`.
#[async_trait::async_trait]
pub trait Peer: Send + Sync {
    async fn store(&self, block: Block, mode: StoreMode) -> Result<(), ConsensusError>;

    async fn fetch(
        &self,
        address: Address,
        local_version: Option<u64>,
    ) -> Result<Option<Block>, ConsensusError>;

    async fn remove(&self, address: Address, sig: RemoveSignature) -> Result<(), ConsensusError>;

    async fn propose(&self, address: Address, proposal_id: ProposalId) -> Result<Promise, ConsensusError>;

    async fn accept(
        &self,
        address: Address,
        proposal_id: ProposalId,
        value: PaxosValue,
    ) -> Result<bool, ConsensusError>;
}

/// The facade-level surface: block storage only, no acceptor RPCs. What
/// `doughnut-async` and `doughnut-cache` wrap and decorate, and what
/// `doughnut::Doughnut` holds as `Box<dyn Consensus>` (SPEC_FULL.md
/// §4.10). `LocalPeer` and `PaxosServer` each implement it by delegating
/// to their `Peer` methods of the same name.
#[async_trait::async_trait]
pub trait Consensus: Send + Sync {
    async fn store(&self, block: Block, mode: StoreMode) -> Result<(), ConsensusError>;

    async fn fetch(
        &self,
        address: Address,
        local_version: Option<u64>,
    ) -> Result<Option<Block>, ConsensusError>;

    async fn remove(&self, address: Address, sig: RemoveSignature) -> Result<(), ConsensusError>;
}
