//! The in-memory cache table: entries by address, plus two time-ordered
//! indices (last-used for TTL eviction, last-fetched for invalidation
//! refresh) — the same `BTreeMap`-pair substitute for `boost::multi_index`
//! used by `doughnut-async::index`, here mirroring
//! `Cache::_cache.get<1>()`/`get<2>()` from the original.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use doughnut_block::Block;
use doughnut_types::Address;

#[derive(Debug, Clone)]
pub struct CachedBlock {
    pub block: Block,
    pub last_used: Instant,
    pub last_fetched: Instant,
}

#[derive(Default)]
pub struct CacheIndex {
    entries: HashMap<Address, CachedBlock>,
    by_last_used: BTreeMap<(Instant, Address), ()>,
    by_last_fetched: BTreeMap<(Instant, Address), ()>,
}

impl CacheIndex {
    pub fn get(&self, address: &Address) -> Option<&CachedBlock> {
        self.entries.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn touch_used(&mut self, address: Address, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&address) {
            self.by_last_used.remove(&(entry.last_used, address));
            entry.last_used = now;
            self.by_last_used.insert((now, address), ());
        }
    }

    /// Inserts or overwrites the cached block for `address`, stamping both
    /// `last_used` and `last_fetched` to `now` (a fresh value is, by
    /// definition, not stale).
    pub fn put(&mut self, address: Address, block: Block, now: Instant) {
        if let Some(old) = self.entries.get(&address) {
            self.by_last_used.remove(&(old.last_used, address));
            self.by_last_fetched.remove(&(old.last_fetched, address));
        }
        self.entries.insert(
            address,
            CachedBlock {
                block,
                last_used: now,
                last_fetched: now,
            },
        );
        self.by_last_used.insert((now, address), ());
        self.by_last_fetched.insert((now, address), ());
    }

    /// Updates just the fetched timestamp (and optionally the block, if the
    /// backend returned a refreshed copy) after an invalidation re-fetch.
    pub fn refresh(&mut self, address: Address, block: Option<Block>, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&address) {
            self.by_last_fetched.remove(&(entry.last_fetched, address));
            if let Some(block) = block {
                entry.block = block;
            }
            entry.last_fetched = now;
            self.by_last_fetched.insert((now, address), ());
        }
    }

    pub fn remove(&mut self, address: &Address) -> Option<CachedBlock> {
        let entry = self.entries.remove(address)?;
        self.by_last_used.remove(&(entry.last_used, *address));
        self.by_last_fetched.remove(&(entry.last_fetched, *address));
        Some(entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_last_used.clear();
        self.by_last_fetched.clear();
    }

    /// Addresses whose `last_used` is older than `deadline`, oldest first.
    pub fn stale_by_use(&self, deadline: Instant) -> Vec<Address> {
        self.by_last_used
            .range(..(deadline, Address::new([0xffu8; 32], doughnut_types::AddressFlags::Unflagged)))
            .map(|((_, a), ())| *a)
            .collect()
    }

    /// Addresses whose `last_fetched` is older than `deadline` — candidates
    /// for a refetch-and-version-check, oldest first.
    pub fn stale_by_fetch(&self, deadline: Instant) -> Vec<Address> {
        self.by_last_fetched
            .range(..(deadline, Address::new([0xffu8; 32], doughnut_types::AddressFlags::Unflagged)))
            .map(|((_, a), ())| *a)
            .collect()
    }

    /// The single least-recently-used address, for size-bound eviction.
    pub fn least_recently_used(&self) -> Option<Address> {
        self.by_last_used.keys().next().map(|(_, a)| *a)
    }
}
