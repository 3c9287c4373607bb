//! Async write-back journal wrapping any `Consensus` (SPEC_FULL.md §4.8):
//! coalesced, bounded in memory, replayed on restart before new writers are
//! let through.

mod config;
mod consensus;
mod index;
mod journal;

pub use config::AsyncConfig;
pub use consensus::AsyncConsensus;
pub use journal::{JournalEntry, JournalError, Op, ResolverId};
