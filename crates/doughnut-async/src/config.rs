//! Tunables for one `AsyncConsensus`, in the `*Config` + `Default` style
//! `qc-02-block-storage::AssemblyConfig` uses.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AsyncConfig {
    /// Directory journal entries are persisted under, one file per index.
    pub journal_dir: PathBuf,

    /// In-flight entries kept in the primary index before they spill to
    /// disk-only tracking (SPEC_FULL.md §4.8 memory bound).
    pub max_blocks: usize,

    /// How many times a `Set` may supersede a prior pending `Set` for the
    /// same address before a round is forced to flush rather than keep
    /// coalescing (Open Question 3, SPEC_FULL.md §9).
    pub max_coalesce_hops: u32,
}

impl AsyncConfig {
    pub fn new(journal_dir: PathBuf) -> Self {
        Self {
            journal_dir,
            max_blocks: 4096,
            max_coalesce_hops: 8,
        }
    }
}
