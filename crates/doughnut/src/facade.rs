//! `Doughnut`: the facade assembling the stack below it into the named
//! operations a caller (a filesystem translation layer, in the full
//! system) actually uses. Grounded on `node-runtime::container`'s
//! wiring-container pattern, scaled down to this crate's much smaller set
//! of subsystems (SPEC_FULL.md §4.10).

use std::sync::Arc;

use doughnut_block::{Acb, Block, Chb, ConsensusError, Nb, Okb, RemoveSignature};
use doughnut_crypto::{KeyPair, PublicKey, SessionKeyPair};
use doughnut_overlay::{Consensus, Overlay, StoreMode};
use doughnut_types::{Address, NodeId};
use tracing::instrument;

use crate::passport::Passport;

/// Maximum number of conflict-resolve-retry cycles `insert`/`update` will
/// run before giving up and surfacing the conflict, mirroring the bounded
/// retry `doughnut-paxos::PaxosServer::run_round` uses for proposer
/// contention.
const MAX_CONFLICT_RETRIES: u32 = 3;

/// Produces a replacement block from a losing write and the block that
/// actually won, the way spec.md §4.10 describes callers retrying "with a
/// new sealed block" on `Conflict`.
pub type ConflictResolver<'a> = &'a dyn Fn(&Block, &Block) -> Block;

pub struct Doughnut {
    pub node_id: NodeId,
    pub keys: KeyPair,
    pub passport: Option<Passport>,
    pub overlay: Arc<dyn Overlay>,
    pub consensus: Arc<dyn Consensus>,
}

impl Doughnut {
    pub fn new(
        node_id: NodeId,
        keys: KeyPair,
        passport: Option<Passport>,
        overlay: Arc<dyn Overlay>,
        consensus: Arc<dyn Consensus>,
    ) -> Self {
        Self {
            node_id,
            keys,
            passport,
            overlay,
            consensus,
        }
    }

    pub fn owner_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    // ---- constructors: pure, never touch the overlay (SPEC_FULL.md §4.10) ----

    pub fn make_immutable_block(&self, data: Vec<u8>, owner: Option<Address>) -> Block {
        Block::Chb(Chb::new(data, owner))
    }

    /// A fresh, unsealed OKB owned by this facade's key. Callers seal it
    /// themselves (directly, or implicitly via `insert`/`update`) once the
    /// payload is final.
    pub fn make_mutable_block(&self, salt: [u8; 16], payload: Vec<u8>) -> Okb {
        Okb::new(self.owner_key(), salt, payload)
    }

    /// An ACL-bearing mutable block, owned by this facade's key. The
    /// owner's session key is derived from its own seed here since the
    /// owner is the only party guaranteed to know it up front — granting
    /// another reader access needs their session key supplied separately
    /// (see `Acb::set_acl_entry`).
    pub fn make_acl_block(&self, salt: [u8; 16]) -> Acb {
        let owner_session_key = SessionKeyPair::from_seed(self.keys.to_seed()).public();
        Acb::new(self.owner_key(), owner_session_key, salt)
    }

    pub fn make_named_block(&self, name: String, payload: Vec<u8>) -> Nb {
        Nb::new(self.owner_key(), name, payload)
    }

    /// Pure function of `name` and this facade's owner key — never
    /// contacts the overlay (SPEC_FULL.md §4.10).
    pub fn named_block_address(&self, name: &str) -> Address {
        Nb::compute_address(&self.owner_key(), name)
    }

    // ---- named operations ----

    #[instrument(skip(self, block, resolver), fields(address = %block.address(), kind = block.kind()))]
    pub async fn insert(&self, block: Block, resolver: Option<ConflictResolver<'_>>) -> Result<(), ConsensusError> {
        self.store_with_retries(block, StoreMode::Insert, resolver).await
    }

    #[instrument(skip(self, block, resolver), fields(address = %block.address(), kind = block.kind()))]
    pub async fn update(&self, block: Block, resolver: Option<ConflictResolver<'_>>) -> Result<(), ConsensusError> {
        self.store_with_retries(block, StoreMode::Update, resolver).await
    }

    async fn store_with_retries(
        &self,
        mut block: Block,
        mode: StoreMode,
        resolver: Option<ConflictResolver<'_>>,
    ) -> Result<(), ConsensusError> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            match self.consensus.store(block.clone(), mode).await {
                Ok(()) => return Ok(()),
                Err(ConsensusError::Conflict { current, .. }) => match resolver {
                    Some(resolve) => block = resolve(&block, &current),
                    None => {
                        return Err(ConsensusError::Conflict {
                            address: block.address(),
                            current,
                        })
                    }
                },
                Err(e) => return Err(e),
            }
        }
        self.consensus.store(block.clone(), mode).await
    }

    /// Fetches a block, optionally decrypting an ACB/GB payload with this
    /// facade's own key material (`Acb::decrypt_with`).
    #[instrument(skip(self))]
    pub async fn fetch(
        &self,
        address: Address,
        local_version: Option<u64>,
        decrypt_data: bool,
    ) -> Result<Option<FetchedBlock>, ConsensusError> {
        let Some(block) = self.consensus.fetch(address, local_version).await? else {
            return Ok(None);
        };
        let plaintext = if decrypt_data {
            self.decrypt(&block)
        } else {
            None
        };
        Ok(Some(FetchedBlock { block, plaintext }))
    }

    fn decrypt(&self, block: &Block) -> Option<Vec<u8>> {
        let seed = self.keys.to_seed();
        match block {
            Block::Acb(acb) => acb.decrypt_with(seed).ok(),
            Block::Gb(gb) => gb.base().decrypt_with(seed).ok(),
            _ => None,
        }
    }

    #[instrument(skip(self, signature))]
    pub async fn remove(&self, address: Address, signature: RemoveSignature) -> Result<(), ConsensusError> {
        self.consensus.remove(address, signature).await
    }
}

#[derive(Debug, Clone)]
pub struct FetchedBlock {
    pub block: Block,
    /// `Some` only when `fetch` was asked to decrypt an ACB/GB payload and
    /// this facade's key could unwrap the corresponding token.
    pub plaintext: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use doughnut_local::LocalPeer;
    use doughnut_overlay::StaticOverlay;
    use doughnut_silo::MemorySilo;

    fn facade() -> Doughnut {
        let keys = KeyPair::generate();
        let node_id = NodeId(*keys.public_key().as_bytes());
        let overlay = Arc::new(StaticOverlay::new());
        let consensus: Arc<dyn Consensus> = Arc::new(LocalPeer::new(Arc::new(MemorySilo::new(None))));
        Doughnut::new(node_id, keys, None, overlay, consensus)
    }

    #[tokio::test]
    async fn insert_then_fetch_roundtrips_an_immutable_block() {
        let facade = facade();
        let block = facade.make_immutable_block(b"hello".to_vec(), None);
        let address = block.address();

        facade.insert(block, None).await.unwrap();
        let fetched = facade.fetch(address, None, false).await.unwrap().unwrap();
        assert_eq!(fetched.block.payload(), b"hello");
    }

    #[tokio::test]
    async fn named_block_address_never_touches_the_overlay() {
        let facade = facade();
        let address = facade.named_block_address("root");
        assert_eq!(address, Nb::compute_address(&facade.owner_key(), "root"));
    }

    #[tokio::test]
    async fn insert_without_a_resolver_surfaces_the_conflict() {
        let facade = facade();
        let block = facade.make_immutable_block(b"one".to_vec(), None);
        facade.insert(block.clone(), None).await.unwrap();

        let err = facade.insert(block, None).await.unwrap_err();
        assert!(matches!(err, ConsensusError::Conflict { .. }));
    }

    /// Conflicts exactly once on `store`, against `loser`, then delegates
    /// to `inner` for every later call — just enough to exercise
    /// `store_with_retries`'s resolve-and-retry loop deterministically.
    struct ConflictOnceConsensus {
        inner: Arc<dyn Consensus>,
        loser: Block,
        conflicted: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Consensus for ConflictOnceConsensus {
        async fn store(&self, block: Block, mode: StoreMode) -> Result<(), ConsensusError> {
            if !self.conflicted.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(ConsensusError::Conflict {
                    address: block.address(),
                    current: Box::new(self.loser.clone()),
                });
            }
            self.inner.store(block, mode).await
        }

        async fn fetch(&self, address: Address, local_version: Option<u64>) -> Result<Option<Block>, ConsensusError> {
            self.inner.fetch(address, local_version).await
        }

        async fn remove(&self, address: Address, sig: RemoveSignature) -> Result<(), ConsensusError> {
            self.inner.remove(address, sig).await
        }
    }

    #[tokio::test]
    async fn update_with_a_resolver_retries_with_the_resolved_block() {
        let keys = KeyPair::generate();
        let node_id = NodeId(*keys.public_key().as_bytes());
        let overlay = Arc::new(StaticOverlay::new());
        let inner: Arc<dyn Consensus> = Arc::new(LocalPeer::new(Arc::new(MemorySilo::new(None))));

        let ours = Block::Chb(Chb::new(b"ours".to_vec(), None));
        let theirs = Block::Chb(Chb::new(b"theirs".to_vec(), None));
        let consensus: Arc<dyn Consensus> = Arc::new(ConflictOnceConsensus {
            inner,
            loser: theirs.clone(),
            conflicted: std::sync::atomic::AtomicBool::new(false),
        });
        let facade = Doughnut::new(node_id, keys, None, overlay, consensus);

        let resolver: ConflictResolver = &|_ours, current| current.clone();
        facade.insert(ours, Some(resolver)).await.unwrap();

        let fetched = facade.fetch(theirs.address(), None, false).await.unwrap().unwrap();
        assert_eq!(fetched.block.payload(), b"theirs");
    }
}
