//! The six end-to-end scenarios a full implementation of this store is
//! seeded against.

use std::sync::Arc;
use std::time::Duration;

use doughnut_async::{AsyncConfig, AsyncConsensus};
use doughnut_block::{Acb, Block, ConsensusError, Okb};
use doughnut_cache::{CacheConfig, CacheConsensus};
use doughnut_crypto::{KeyPair, SessionKeyPair};
use doughnut_overlay::Consensus;
use doughnut_testkit::TwoNodeCluster;

#[tokio::test]
async fn insert_fetch_chb() {
    let cluster = TwoNodeCluster::new();
    let facade = cluster.facade(0);

    let block = facade.make_immutable_block(b"hello".to_vec(), None);
    let address = block.address();
    facade.insert(block, None).await.unwrap();

    let fetched = facade.fetch(address, None, false).await.unwrap().unwrap();
    assert_eq!(fetched.block.payload(), b"hello");
}

#[tokio::test]
async fn mutable_update_race_produces_exactly_one_winner() {
    let cluster = TwoNodeCluster::new();
    let keys = KeyPair::generate();
    let salt = [7u8; 16];

    let mut base = Okb::new(keys.public_key(), salt, b"v0".to_vec());
    base.seal_with(&keys, true).unwrap();
    let address = base.address();
    cluster.nodes[0].store(Block::Okb(base), doughnut_overlay::StoreMode::Insert).await.unwrap();

    let mut a = Okb::new(keys.public_key(), salt, b"A".to_vec());
    a.seal_with(&keys, true).unwrap();
    let mut b = Okb::new(keys.public_key(), salt, b"B".to_vec());
    b.seal_with(&keys, true).unwrap();

    let r1 = cluster.nodes[0].store(Block::Okb(a.clone()), doughnut_overlay::StoreMode::Update).await;
    let r2 = cluster.nodes[1].store(Block::Okb(b.clone()), doughnut_overlay::StoreMode::Update).await;

    let outcomes = [r1, r2];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes.iter().filter(|r| matches!(r, Err(ConsensusError::Conflict { .. }))).count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 1);

    let fetched = cluster.nodes[0].fetch(address, None).await.unwrap().unwrap();
    assert_eq!(fetched.version(), Some(1));
}

#[tokio::test]
async fn async_journal_survives_a_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let silo: Arc<dyn doughnut_silo::Silo> = Arc::new(doughnut_silo::FilesystemSilo::new(tmp.path().join("silo"), None).await.unwrap());
    let backend: Arc<dyn Consensus> = Arc::new(doughnut_local::LocalPeer::new(silo));
    let journal_dir = tmp.path().join("journal");

    let blocks: Vec<Block> = (0..10)
        .map(|i| Block::Chb(doughnut_block::Chb::new(format!("entry-{i}").into_bytes(), None)))
        .collect();

    {
        let async_consensus = AsyncConsensus::open(backend.clone(), AsyncConfig::new(journal_dir.clone()));
        for block in &blocks {
            async_consensus.store(block.clone(), doughnut_overlay::StoreMode::Insert).await.unwrap();
        }
    }

    let reopened = AsyncConsensus::open(backend.clone(), AsyncConfig::new(journal_dir));
    tokio::time::sleep(Duration::from_millis(200)).await;
    for block in &blocks {
        let fetched = reopened.fetch(block.address(), None).await.unwrap();
        assert_eq!(fetched.unwrap().payload(), block.payload());
    }
}

#[tokio::test]
async fn named_block_overwrite_rule() {
    let cluster = TwoNodeCluster::new();
    let facade = cluster.facade(0);

    let nb = facade.make_named_block("root".to_string(), b"X".to_vec());
    facade.insert(Block::Nb(nb.clone()), None).await.unwrap();

    // same payload re-inserted at the same (owner, name) is accepted
    let same = facade.make_named_block("root".to_string(), b"X".to_vec());
    facade.insert(Block::Nb(same), None).await.unwrap();

    let different = facade.make_named_block("root".to_string(), b"Y".to_vec());
    let err = facade.insert(Block::Nb(different), None).await.unwrap_err();
    assert!(matches!(err, ConsensusError::ValidationFailed(_)));
}

#[tokio::test]
async fn acl_revocation_blocks_further_writes_from_the_removed_user() {
    let cluster = TwoNodeCluster::new();
    let owner = KeyPair::generate();
    let guest = KeyPair::generate();
    let salt = [3u8; 16];

    let owner_session = SessionKeyPair::from_seed(owner.to_seed()).public();
    let guest_session = SessionKeyPair::from_seed(guest.to_seed()).public();
    let mut acb = Acb::new(owner.public_key(), owner_session, salt);
    acb.set_acl_entry(guest.public_key(), guest_session, true, true);
    acb.seal_with(&owner, Some(b"v0"), true).unwrap();
    let address = acb.address();
    cluster.nodes[0].store(Block::Acb(acb.clone()), doughnut_overlay::StoreMode::Insert).await.unwrap();

    let mut guest_update = acb.clone();
    guest_update.seal_with(&guest, Some(b"v1"), true).unwrap();
    cluster.nodes[0].store(Block::Acb(guest_update.clone()), doughnut_overlay::StoreMode::Update).await.unwrap();

    let mut revoked = guest_update.clone();
    revoked.remove_acl_entry(&guest.public_key());
    revoked.seal_with(&owner, Some(b"v2"), true).unwrap();
    cluster.nodes[0].store(Block::Acb(revoked), doughnut_overlay::StoreMode::Update).await.unwrap();

    let mut stale_guest_attempt = guest_update.clone();
    stale_guest_attempt.seal_with(&guest, Some(b"v3-denied"), true).unwrap();
    let err = cluster.nodes[0]
        .store(Block::Acb(stale_guest_attempt), doughnut_overlay::StoreMode::Update)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsensusError::ValidationFailed(_)));

    let fetched = cluster.nodes[0].fetch(address, None).await.unwrap().unwrap();
    assert_eq!(fetched.version(), Some(2));
}

#[tokio::test]
async fn cache_serves_within_invalidation_and_refetches_after() {
    let cluster = TwoNodeCluster::new();
    let backend: Arc<dyn Consensus> = cluster.nodes[0].clone();
    let mut config = CacheConfig::default();
    config.ttl = Duration::from_secs(60);
    config.invalidation = Duration::from_millis(100);
    let cache = CacheConsensus::open(backend.clone(), config).await.unwrap();

    let keys = KeyPair::generate();
    let salt = [1u8; 16];
    let mut okb = Okb::new(keys.public_key(), salt, b"v3".to_vec());
    okb.seal_with(&keys, true).unwrap();
    okb.seal_with(&keys, true).unwrap();
    okb.seal_with(&keys, true).unwrap();
    let address = okb.address();
    cache.store(Block::Okb(okb.clone()), doughnut_overlay::StoreMode::Insert).await.unwrap();
    let first = cache.fetch(address, None).await.unwrap().unwrap();
    assert_eq!(first.version(), Some(3));

    let mut bumped = okb.clone();
    bumped.seal_with(&keys, true).unwrap();
    backend.store(Block::Okb(bumped), doughnut_overlay::StoreMode::Update).await.unwrap();

    let still_cached = cache.fetch(address, None).await.unwrap().unwrap();
    assert_eq!(still_cached.version(), Some(3));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let refreshed = cache.fetch(address, None).await.unwrap().unwrap();
    assert_eq!(refreshed.version(), Some(4));
}

