//! One journal entry and its on-disk encoding. Grounded on `doughnut-silo::
//! FilesystemSilo`'s temp-file-then-rename durability, reused here per
//! entry instead of per address.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use doughnut_block::{Block, RemoveSignature};
use doughnut_overlay::StoreMode;
use doughnut_types::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("journal I/O error: {0}")]
    Io(String),
    #[error("corrupt journal entry at index {0}")]
    Corrupt(u64),
}

/// What a pending write does once it reaches the backend `Consensus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Op {
    Set { block: Block, mode: StoreMode },
    Remove { sig: RemoveSignature },
}

/// A conflict-resolution policy recorded alongside a pending write, carried
/// through coalescing rather than dropped (Open Question 3, SPEC_FULL.md
/// §9: resolvers chain, they don't get replaced).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResolverId {
    /// The coalesced write simply wins; no reconciliation needed.
    LastWriteWins,
    /// If the backend already holds something else for this address,
    /// keep the backend's value and drop this write.
    DeferToConsensus,
    /// Try the second policy; if it still leaves a conflict, fall back to
    /// the first. Built by coalescing two `Set`s each carrying a resolver.
    Chained(Box<ResolverId>, Box<ResolverId>),
}

/// One record in the write-back journal: the op to apply, in order, plus
/// whatever resolver governs a conflict at flush time
/// (SPEC_FULL.md §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub index: u64,
    pub address: Address,
    pub op: Op,
    pub resolver: Option<ResolverId>,
}

pub fn entry_path(journal_dir: &Path, index: u64) -> PathBuf {
    journal_dir.join(index.to_string())
}

pub async fn persist(journal_dir: &Path, entry: &JournalEntry) -> Result<(), JournalError> {
    let bytes = bincode::serialize(entry).map_err(|e| JournalError::Io(e.to_string()))?;
    let path = entry_path(journal_dir, entry.index);
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| JournalError::Io(e.to_string()))?;
    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| JournalError::Io(e.to_string()))?;
    Ok(())
}

pub async fn load(journal_dir: &Path, index: u64) -> Result<Option<JournalEntry>, JournalError> {
    let path = entry_path(journal_dir, index);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(JournalError::Io(e.to_string())),
    };
    bincode::deserialize(&bytes)
        .map(Some)
        .map_err(|_| JournalError::Corrupt(index))
}

pub async fn delete(journal_dir: &Path, index: u64) -> Result<(), JournalError> {
    match tokio::fs::remove_file(entry_path(journal_dir, index)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(JournalError::Io(e.to_string())),
    }
}

/// Numerically-sorted indices of every entry file currently on disk, the
/// order replay must apply them in.
pub async fn scan_indices(journal_dir: &Path) -> Result<Vec<u64>, JournalError> {
    let mut entries = match tokio::fs::read_dir(journal_dir).await {
        Ok(r) => r,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(JournalError::Io(e.to_string())),
    };
    let mut indices = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| JournalError::Io(e.to_string()))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Ok(index) = name.parse::<u64>() {
            indices.push(index);
        }
    }
    indices.sort_unstable();
    Ok(indices)
}
