//! `CacheConsensus`: a read-through/write-through decorator over any
//! `Consensus`, bounded by size and by age. Grounded directly on
//! `original_source/src/infinit/model/doughnut/Cache.cc`: `_store` writes
//! through and refreshes the entry, `_fetch` serves a resident entry
//! without touching the backend unless it has gone stale, and `_cleanup`
//! runs the same two-pass sweep — evict anything unused past `ttl`, then
//! re-fetch anything not freshly fetched past `invalidation` to pick up a
//! newer version of a mutable block.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use doughnut_block::{Block, ConsensusError, RemoveSignature};
use doughnut_overlay::{Consensus, StoreMode};
use doughnut_types::{Address, AddressFlags};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::config::CacheConfig;
use crate::disk::DiskChbCache;
use crate::index::CacheIndex;

pub struct CacheConsensus {
    inner: Arc<dyn Consensus>,
    config: CacheConfig,
    index: Mutex<CacheIndex>,
    disk: Option<DiskChbCache>,
    /// Collapses concurrent misses on the same address into a single
    /// backend fetch, the way `Cache.cc`'s per-address fetch future does.
    in_flight: DashMap<Address, Arc<AsyncMutex<()>>>,
}

impl CacheConsensus {
    pub async fn open(inner: Arc<dyn Consensus>, config: CacheConfig) -> Result<Arc<Self>, ConsensusError> {
        let disk = match &config.disk_dir {
            Some(dir) => Some(DiskChbCache::open(dir.clone(), config.disk_max_entries).await?),
            None => None,
        };
        Ok(Arc::new(Self {
            inner,
            config,
            index: Mutex::new(CacheIndex::default()),
            disk,
            in_flight: DashMap::new(),
        }))
    }

    fn barrier_for(&self, address: Address) -> Arc<AsyncMutex<()>> {
        self.in_flight.entry(address).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    fn evict_if_over_bound(&self) {
        let mut index = self.index.lock();
        while index.len() > self.config.max_blocks {
            let Some(victim) = index.least_recently_used() else { break };
            index.remove(&victim);
        }
    }

    fn remember(&self, address: Address, block: Block, now: Instant) {
        self.index.lock().put(address, block, now);
        self.evict_if_over_bound();
    }

    /// A resident entry is still good to serve without a backend round trip
    /// unless it is a mutable block whose last fetch has aged past
    /// `invalidation`.
    fn is_fresh(&self, block: &Block, last_fetched: Instant, now: Instant) -> bool {
        block.version().is_none() || now.duration_since(last_fetched) < self.config.invalidation
    }

    async fn persist_to_disk(&self, block: &Block) -> Result<(), ConsensusError> {
        if let (Some(disk), Block::Chb(chb)) = (&self.disk, block) {
            disk.put(chb).await?;
        }
        Ok(())
    }

    /// The full TTL-eviction + invalidation-refresh sweep (SPEC_FULL.md
    /// §4.9). Callers drive this on whatever schedule fits — a periodic
    /// background task in the facade, or directly in tests.
    pub async fn cleanup(&self, now: Instant) -> Result<(), ConsensusError> {
        let expired = {
            let index = self.index.lock();
            index.stale_by_use(now - self.config.ttl)
        };
        for address in expired {
            debug!(%address, "cache entry expired, evicting");
            self.index.lock().remove(&address);
        }

        let stale = {
            let index = self.index.lock();
            index.stale_by_fetch(now - self.config.invalidation)
        };
        for address in stale {
            let Some(cached) = self.index.lock().get(&address).cloned() else { continue };
            if cached.block.version().is_none() {
                continue;
            }
            match self.inner.fetch(address, cached.block.version()).await {
                Ok(Some(fresh)) => self.index.lock().refresh(address, Some(fresh), now),
                Ok(None) => self.index.lock().refresh(address, None, now),
                Err(e) => debug!(%address, %e, "invalidation refetch failed, leaving entry as-is"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Consensus for CacheConsensus {
    async fn store(&self, block: Block, mode: StoreMode) -> Result<(), ConsensusError> {
        self.inner.store(block.clone(), mode).await?;
        let address = block.address();
        self.persist_to_disk(&block).await?;
        self.remember(address, block, Instant::now());
        Ok(())
    }

    async fn fetch(&self, address: Address, local_version: Option<u64>) -> Result<Option<Block>, ConsensusError> {
        let now = Instant::now();
        if let Some(cached) = self.index.lock().get(&address).cloned() {
            if let Some(known) = local_version {
                if cached.block.version() == Some(known) {
                    self.index.lock().touch_used(address, now);
                    return Ok(None);
                }
            }
            if self.is_fresh(&cached.block, cached.last_fetched, now) {
                self.index.lock().touch_used(address, now);
                return Ok(Some(cached.block));
            }
        }

        let barrier = self.barrier_for(address);
        let _guard = barrier.lock().await;

        // Re-check: another task may have just refreshed this while we
        // waited for the barrier.
        let recheck = self.index.lock().get(&address).cloned();
        if let Some(cached) = recheck {
            if self.is_fresh(&cached.block, cached.last_fetched, now) {
                if local_version == cached.block.version() {
                    return Ok(None);
                }
                self.index.lock().touch_used(address, now);
                return Ok(Some(cached.block));
            }
        } else if address.flags() == AddressFlags::Immutable {
            if let Some(disk) = &self.disk {
                if let Some(block) = disk.get(&address).await? {
                    self.remember(address, block.clone(), now);
                    return Ok(Some(block));
                }
            }
        }

        let fetched = self.inner.fetch(address, local_version).await?;
        if let Some(block) = &fetched {
            self.persist_to_disk(block).await?;
            self.remember(address, block.clone(), now);
        }
        Ok(fetched)
    }

    async fn remove(&self, address: Address, sig: RemoveSignature) -> Result<(), ConsensusError> {
        self.inner.remove(address, sig).await?;
        self.index.lock().remove(&address);
        if let Some(disk) = &self.disk {
            disk.remove(&address).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use doughnut_block::{Chb, Okb};
    use doughnut_crypto::KeyPair;
    use doughnut_local::LocalPeer;
    use doughnut_silo::MemorySilo;

    fn backend() -> Arc<dyn Consensus> {
        Arc::new(LocalPeer::new(Arc::new(MemorySilo::new(None))))
    }

    fn sealed_okb(keys: &KeyPair, salt: [u8; 16], payload: &[u8]) -> Okb {
        let mut okb = Okb::new(keys.public_key(), salt, payload.to_vec());
        okb.seal_with(keys, true).unwrap();
        okb
    }

    #[tokio::test]
    async fn a_stored_block_is_served_from_cache_without_hitting_the_backend_again() {
        let backend = backend();
        let cache = CacheConsensus::open(backend.clone(), CacheConfig::new()).await.unwrap();
        let block = Block::Chb(Chb::new(b"hello".to_vec(), None));
        let address = block.address();

        cache.store(block, StoreMode::Insert).await.unwrap();
        let fetched = cache.fetch(address, None).await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn fetch_with_matching_local_version_returns_none() {
        let backend = backend();
        let cache = CacheConsensus::open(backend.clone(), CacheConfig::new()).await.unwrap();
        let keys = KeyPair::generate();
        let block = Block::Okb(sealed_okb(&keys, [1u8; 16], b"v1"));
        let address = block.address();
        let version = block.version();

        cache.store(block, StoreMode::Insert).await.unwrap();
        let fetched = cache.fetch(address, version).await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn cleanup_evicts_entries_unused_past_ttl() {
        let backend = backend();
        let mut config = CacheConfig::new();
        config.ttl = Duration::from_millis(0);
        let cache = CacheConsensus::open(backend.clone(), config).await.unwrap();
        let block = Block::Chb(Chb::new(b"stale".to_vec(), None));
        let address = block.address();

        cache.store(block, StoreMode::Insert).await.unwrap();
        cache.cleanup(Instant::now() + Duration::from_millis(1)).await.unwrap();
        assert!(cache.index.lock().get(&address).is_none());
    }

    #[tokio::test]
    async fn removing_a_block_clears_it_from_cache() {
        let backend = backend();
        let cache = CacheConsensus::open(backend.clone(), CacheConfig::new()).await.unwrap();
        let keys = KeyPair::generate();
        let okb = sealed_okb(&keys, [2u8; 16], b"to-remove");
        let sig = okb.sign_remove(&keys);
        let block = Block::Okb(okb);
        let address = block.address();
        cache.store(block, StoreMode::Insert).await.unwrap();

        cache.remove(address, sig).await.unwrap();
        assert!(cache.index.lock().get(&address).is_none());
        assert!(backend.fetch(address, None).await.unwrap().is_none());
    }
}
