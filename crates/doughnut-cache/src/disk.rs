//! On-disk CHB cache: one file per address under `disk_dir`, independent of
//! the in-memory TTL above it. Grounded on `doughnut-silo::FilesystemSilo`'s
//! temp-file-then-rename durability and its startup directory scan, with
//! eviction driven by file mtime rather than an in-process clock so the
//! cache survives a restart with a correct LRU order.
//!
//! Only CHBs are kept here: they are immutable and content-addressed, so a
//! stale disk copy is never wrong the way a cached mutable block would be
//! (`Cache.cc` draws the same line between its in-memory table and any
//! on-disk persistence of fetched blocks).

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::SystemTime;

use doughnut_block::{Block, Chb};
use doughnut_types::{Address, ConsensusError};
use parking_lot::Mutex;

struct DiskState {
    /// mtime -> address, oldest first; rebuilt from the directory at
    /// startup and kept current on every write.
    by_mtime: BTreeMap<SystemTime, Address>,
}

pub struct DiskChbCache {
    dir: PathBuf,
    max_entries: usize,
    state: Mutex<DiskState>,
}

impl DiskChbCache {
    pub async fn open(dir: PathBuf, max_entries: usize) -> Result<Self, ConsensusError> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ConsensusError::Transient(e.to_string()))?;
        let by_mtime = scan_existing(&dir).await?;
        Ok(Self {
            dir,
            max_entries,
            state: Mutex::new(DiskState { by_mtime }),
        })
    }

    fn path_for(&self, address: &Address) -> PathBuf {
        self.dir.join(hex::encode(address.to_bytes()))
    }

    pub async fn get(&self, address: &Address) -> Result<Option<Block>, ConsensusError> {
        match tokio::fs::read(self.path_for(address)).await {
            Ok(bytes) => {
                let chb: Chb = bincode::deserialize(&bytes)
                    .map_err(|e| ConsensusError::Transient(e.to_string()))?;
                Ok(Some(Block::Chb(chb)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConsensusError::Transient(e.to_string())),
        }
    }

    pub async fn put(&self, chb: &Chb) -> Result<(), ConsensusError> {
        let address = chb.address();
        let path = self.path_for(&address);
        let tmp_path = path.with_extension("tmp");
        let bytes = bincode::serialize(chb).map_err(|e| ConsensusError::Transient(e.to_string()))?;
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| ConsensusError::Transient(e.to_string()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| ConsensusError::Transient(e.to_string()))?;
        let mtime = tokio::fs::metadata(&path)
            .await
            .and_then(|m| m.modified())
            .map_err(|e| ConsensusError::Transient(e.to_string()))?;

        let evict = {
            let mut state = self.state.lock();
            state.by_mtime.insert(mtime, address);
            if state.by_mtime.len() > self.max_entries {
                state.by_mtime.iter().next().map(|(t, a)| (*t, *a))
            } else {
                None
            }
        };
        if let Some((mtime, evicted)) = evict {
            self.state.lock().by_mtime.remove(&mtime);
            let _ = tokio::fs::remove_file(self.path_for(&evicted)).await;
        }
        Ok(())
    }

    pub async fn remove(&self, address: &Address) -> Result<(), ConsensusError> {
        match tokio::fs::remove_file(self.path_for(address)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ConsensusError::Transient(e.to_string())),
        }
        let mut state = self.state.lock();
        state.by_mtime.retain(|_, a| a != address);
        Ok(())
    }
}

async fn scan_existing(dir: &PathBuf) -> Result<BTreeMap<SystemTime, Address>, ConsensusError> {
    let mut by_mtime = BTreeMap::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(r) => r,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(by_mtime),
        Err(e) => return Err(ConsensusError::Transient(e.to_string())),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ConsensusError::Transient(e.to_string()))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Ok(bytes) = hex::decode(name) else { continue };
        let Ok(raw): Result<[u8; 33], _> = bytes.try_into() else { continue };
        let address = Address::from_bytes(raw);
        let metadata = entry
            .metadata()
            .await
            .map_err(|e| ConsensusError::Transient(e.to_string()))?;
        let mtime = metadata
            .modified()
            .map_err(|e| ConsensusError::Transient(e.to_string()))?;
        by_mtime.insert(mtime, address);
    }
    Ok(by_mtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskChbCache::open(dir.path().to_path_buf(), 16).await.unwrap();
        let chb = Chb::new(b"payload".to_vec(), None);
        cache.put(&chb).await.unwrap();
        let fetched = cache.get(&chb.address()).await.unwrap().unwrap();
        assert_eq!(fetched.address(), chb.address());
    }

    #[tokio::test]
    async fn exceeding_max_entries_evicts_the_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskChbCache::open(dir.path().to_path_buf(), 1).await.unwrap();
        let first = Chb::new(b"one".to_vec(), None);
        let second = Chb::new(b"two".to_vec(), None);
        cache.put(&first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        cache.put(&second).await.unwrap();
        assert!(cache.get(&first.address()).await.unwrap().is_none());
        assert!(cache.get(&second.address()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reopening_rebuilds_the_mtime_index_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let chb = Chb::new(b"durable".to_vec(), None);
        {
            let cache = DiskChbCache::open(dir.path().to_path_buf(), 16).await.unwrap();
            cache.put(&chb).await.unwrap();
        }
        let reopened = DiskChbCache::open(dir.path().to_path_buf(), 16).await.unwrap();
        assert!(reopened.get(&chb.address()).await.unwrap().is_some());
    }
}
