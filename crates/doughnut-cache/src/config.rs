//! Tunables for one `CacheConsensus`, defaults carried over directly from
//! `original_source/src/infinit/model/doughnut/Cache.cc`'s constructor
//! (15s invalidation, 300s TTL, 64_000_000-entry size — scaled down here
//! to a block count rather than a byte budget, since this cache is keyed
//! by `Address` rather than measured in raw bytes).

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry may sit unused before `cleanup` evicts it.
    pub ttl: Duration,

    /// How long a mutable block may go without a fresh fetch before
    /// `cleanup` re-fetches it from the backend to check for a newer
    /// version.
    pub invalidation: Duration,

    /// Maximum resident entries. The original's `_cache_size` has a
    /// `FIXME: take cache_size in account too` left unimplemented; this
    /// port closes that gap by evicting the least-recently-used entry
    /// once the bound is exceeded.
    pub max_blocks: usize,

    /// Directory immutable (CHB) blocks are persisted under, independent
    /// of the in-memory TTL — see `doughnut-cache::disk`.
    pub disk_dir: Option<PathBuf>,

    /// Maximum files kept in the disk CHB cache before the oldest
    /// (by mtime) are evicted.
    pub disk_max_entries: usize,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            invalidation: Duration::from_secs(15),
            max_blocks: 8192,
            disk_dir: None,
            disk_max_entries: 65536,
        }
    }

    pub fn with_disk_dir(mut self, dir: PathBuf) -> Self {
        self.disk_dir = Some(dir);
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}
