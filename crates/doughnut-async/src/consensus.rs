//! `AsyncConsensus`: a write-back decorator over any `Consensus`. Writes
//! land in the journal and return immediately; a background task flushes
//! them to the wrapped backend in index order, coalescing and spilling as
//! described in SPEC_FULL.md §4.8. Grounded on `node-runtime::wiring`'s
//! startup-barrier idiom for the replay-before-accepting-writers rule.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use doughnut_block::{Block, ConsensusError, RemoveSignature};
use doughnut_overlay::{Consensus, StoreMode};
use doughnut_types::Address;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

use crate::config::AsyncConfig;
use crate::index::JournalIndex;
use crate::journal::{self, JournalEntry, Op, ResolverId};

const EMPTY_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FLUSH_RETRY_INTERVAL: Duration = Duration::from_millis(200);

pub struct AsyncConsensus {
    inner: Arc<dyn Consensus>,
    journal_dir: PathBuf,
    config: AsyncConfig,
    next_index: AtomicU64,
    index: Mutex<JournalIndex>,
    replay_done: AtomicBool,
    barrier: Notify,
}

impl AsyncConsensus {
    /// Opens the journal directory and starts replay in the background;
    /// writers issued before replay completes wait on `barrier` rather than
    /// racing the backend with un-replayed entries.
    pub fn open(inner: Arc<dyn Consensus>, config: AsyncConfig) -> Arc<Self> {
        let this = Arc::new(Self {
            inner,
            journal_dir: config.journal_dir.clone(),
            config,
            next_index: AtomicU64::new(0),
            index: Mutex::new(JournalIndex::default()),
            replay_done: AtomicBool::new(false),
            barrier: Notify::new(),
        });
        tokio::spawn(Self::replay_then_flush(this.clone()));
        this
    }

    async fn replay_then_flush(self: Arc<Self>) {
        if let Err(e) = self.replay().await {
            warn!(%e, "journal replay encountered an error, continuing with what replayed");
        }
        self.replay_done.store(true, Ordering::Release);
        self.barrier.notify_waiters();
        self.flush_loop().await;
    }

    async fn replay(&self) -> Result<(), journal::JournalError> {
        let indices = journal::scan_indices(&self.journal_dir).await?;
        let mut highest_seen = 0;
        for index in indices {
            highest_seen = highest_seen.max(index + 1);
            let Some(entry) = journal::load(&self.journal_dir, index).await? else {
                continue;
            };
            match self.apply_to_backend(&entry).await {
                Ok(()) => journal::delete(&self.journal_dir, index).await?,
                Err(e) => {
                    debug!(index, %e, "replayed entry not yet applicable, re-queuing");
                    self.index.lock().insert(entry);
                }
            }
        }
        self.next_index.store(highest_seen, Ordering::Relaxed);
        Ok(())
    }

    async fn wait_ready(&self) {
        loop {
            if self.replay_done.load(Ordering::Acquire) {
                return;
            }
            let notified = self.barrier.notified();
            if self.replay_done.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    async fn enqueue(&self, address: Address, op: Op, resolver: Option<ResolverId>) -> Result<(), ConsensusError> {
        let (entry, superseded) = {
            let mut index = self.index.lock();
            let hops = index.hops_for(address);
            let can_coalesce = matches!(op, Op::Set { .. }) && hops < self.config.max_coalesce_hops;
            let previous = if can_coalesce { index.latest_for(address) } else { None };
            let previous_is_set = matches!(previous.as_ref().map(|p| &p.op), Some(Op::Set { .. }));

            let merged_resolver = if previous_is_set {
                match (previous.as_ref().and_then(|p| p.resolver.clone()), resolver) {
                    (Some(r), Some(r2)) => Some(ResolverId::Chained(Box::new(r), Box::new(r2))),
                    (Some(r), None) => Some(r),
                    (None, r) => r,
                }
            } else {
                resolver
            };

            let superseded = if previous_is_set {
                index.set_hops(address, hops + 1);
                previous.map(|p| p.index)
            } else {
                index.clear_hops(address);
                None
            };

            let new_index = self.next_index.fetch_add(1, Ordering::Relaxed);
            let entry = JournalEntry {
                index: new_index,
                address,
                op,
                resolver: merged_resolver,
            };
            index.insert(entry.clone());
            (entry, superseded)
        };

        journal::persist(&self.journal_dir, &entry)
            .await
            .map_err(|e| ConsensusError::Transient(e.to_string()))?;
        if let Some(old) = superseded {
            journal::delete(&self.journal_dir, old)
                .await
                .map_err(|e| ConsensusError::Transient(e.to_string()))?;
        }
        self.enforce_memory_bound();
        Ok(())
    }

    fn enforce_memory_bound(&self) {
        let mut index = self.index.lock();
        while index.resident_len() > self.config.max_blocks {
            let Some(oldest) = index.oldest_index() else { break };
            index.evict_body(oldest);
        }
    }

    /// All journal entries still pending for `address`, in queue order,
    /// loading spilled-to-disk bodies back in on demand.
    pub async fn drain(&self, address: Address) -> Result<Vec<JournalEntry>, ConsensusError> {
        let pending = { self.index.lock().pending_for(address) };
        let mut entries = Vec::with_capacity(pending.len());
        for idx in pending {
            let resident = { self.index.lock().body_for(idx) };
            let entry = match resident {
                Some(entry) => entry,
                None => journal::load(&self.journal_dir, idx)
                    .await
                    .map_err(|e| ConsensusError::Transient(e.to_string()))?
                    .ok_or_else(|| ConsensusError::Transient(format!("journal entry {idx} missing from disk")))?,
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn flush_loop(self: Arc<Self>) {
        loop {
            let next = {
                let index = self.index.lock();
                index.oldest_index().and_then(|i| index.address_for(i).map(|a| (i, a)))
            };
            let Some((idx, address)) = next else {
                tokio::time::sleep(EMPTY_POLL_INTERVAL).await;
                continue;
            };

            let resident = { self.index.lock().body_for(idx) };
            let entry = match resident {
                Some(entry) => entry,
                None => match journal::load(&self.journal_dir, idx).await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => {
                        self.index.lock().forget(address, idx);
                        continue;
                    }
                    Err(e) => {
                        warn!(idx, %e, "could not reload spilled journal entry");
                        tokio::time::sleep(FLUSH_RETRY_INTERVAL).await;
                        continue;
                    }
                },
            };

            match self.apply_to_backend(&entry).await {
                Ok(()) => {
                    self.index.lock().forget(address, idx);
                    if let Err(e) = journal::delete(&self.journal_dir, idx).await {
                        warn!(idx, %e, "flushed entry but could not delete its journal file");
                    }
                }
                Err(e) => {
                    warn!(idx, %e, "flush failed, retrying");
                    tokio::time::sleep(FLUSH_RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn apply_to_backend(&self, entry: &JournalEntry) -> Result<(), ConsensusError> {
        match &entry.op {
            Op::Set { block, mode } => match self.inner.store(block.clone(), *mode).await {
                Ok(()) => Ok(()),
                Err(ConsensusError::Conflict { address, current }) => {
                    self.resolve_conflict(entry.resolver.as_ref(), address, block.clone(), *current)
                        .await
                }
                Err(e) => Err(e),
            },
            Op::Remove { sig } => self.inner.remove(entry.address, sig.clone()).await,
        }
    }

    async fn resolve_conflict(
        &self,
        resolver: Option<&ResolverId>,
        address: Address,
        ours: Block,
        theirs: Block,
    ) -> Result<(), ConsensusError> {
        match resolver {
            None | Some(ResolverId::DeferToConsensus) => {
                debug!(%address, "conflict resolved by deferring to the backend's value");
                Ok(())
            }
            Some(ResolverId::LastWriteWins) => self.inner.store(ours, StoreMode::Update).await,
            Some(ResolverId::Chained(first, second)) => {
                match Box::pin(self.resolve_conflict(Some(second.as_ref()), address, ours.clone(), theirs.clone()))
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(_) => Box::pin(self.resolve_conflict(Some(first.as_ref()), address, ours, theirs)).await,
                }
            }
        }
    }
}

#[async_trait]
impl Consensus for AsyncConsensus {
    #[instrument(skip(self, block), fields(address = %block.address()))]
    async fn store(&self, block: Block, mode: StoreMode) -> Result<(), ConsensusError> {
        self.wait_ready().await;
        let address = block.address();
        self.enqueue(address, Op::Set { block, mode }, None).await
    }

    async fn fetch(&self, address: Address, local_version: Option<u64>) -> Result<Option<Block>, ConsensusError> {
        self.wait_ready().await;
        if let Some(entry) = self.index.lock().latest_for(address) {
            return Ok(match entry.op {
                Op::Set { block, .. } => Some(block),
                Op::Remove { .. } => None,
            });
        }
        self.inner.fetch(address, local_version).await
    }

    #[instrument(skip(self, sig))]
    async fn remove(&self, address: Address, sig: RemoveSignature) -> Result<(), ConsensusError> {
        self.wait_ready().await;
        self.enqueue(address, Op::Remove { sig }, None).await
    }
}
