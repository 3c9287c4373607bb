//! Filesystem Silo adapter. Grounded on `qc-02-block-storage::ports::
//! outbound::FileBackedKVStore` (temp-file-then-rename durability), with the
//! single flat file replaced by one file per address sharded by the
//! address's first byte, since a Doughnut Silo is expected to hold far more
//! entries than Quantum-Chain's single KV blob.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use doughnut_types::{Address, SiloError};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{Silo, SiloStatus, WriteMode};

/// `root/<first-byte-hex>/<33-byte-hex>`, with an in-memory size cache so
/// capacity checks and `list()` never need a directory walk after startup.
pub struct FilesystemSilo {
    root: PathBuf,
    capacity: Option<u64>,
    sizes: Mutex<HashMap<Address, u64>>,
    used: Mutex<u64>,
    /// Bumped on every successful `set`/`erase`, the `tokio::sync`
    /// watch/broadcast idiom reused here as the Silo's usage signal
    /// (SPEC_FULL.md §4.1).
    changed: watch::Sender<u64>,
}

impl FilesystemSilo {
    pub async fn new(root: PathBuf, capacity: Option<u64>) -> Result<Self, SiloError> {
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| SiloError::Io(e.to_string()))?;
        let sizes = scan_existing(&root).await?;
        let used = sizes.values().sum();
        let (changed, _) = watch::channel(0);
        Ok(Self {
            root,
            capacity,
            sizes: Mutex::new(sizes),
            used: Mutex::new(used),
            changed,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    fn path_for(&self, address: &Address) -> PathBuf {
        let bytes = address.to_bytes();
        let shard = hex::encode([bytes[0]]);
        let name = hex::encode(bytes);
        self.root.join(shard).join(name)
    }

    fn notify(&self) {
        self.changed.send_modify(|gen| *gen += 1);
    }
}

async fn scan_existing(root: &Path) -> Result<HashMap<Address, u64>, SiloError> {
    let mut sizes = HashMap::new();
    let mut shards = match tokio::fs::read_dir(root).await {
        Ok(r) => r,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(sizes),
        Err(e) => return Err(SiloError::Io(e.to_string())),
    };
    while let Some(shard) = shards.next_entry().await.map_err(|e| SiloError::Io(e.to_string()))? {
        if !shard.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let mut entries = tokio::fs::read_dir(shard.path())
            .await
            .map_err(|e| SiloError::Io(e.to_string()))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| SiloError::Io(e.to_string()))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(bytes) = hex::decode(name) else { continue };
            let Ok(raw): Result<[u8; 33], _> = bytes.try_into() else { continue };
            let address = Address::from_bytes(raw);
            let metadata = entry.metadata().await.map_err(|e| SiloError::Io(e.to_string()))?;
            sizes.insert(address, metadata.len());
        }
    }
    Ok(sizes)
}

#[async_trait]
impl Silo for FilesystemSilo {
    async fn get(&self, address: &Address) -> Result<Option<Vec<u8>>, SiloError> {
        match tokio::fs::read(self.path_for(address)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SiloError::Io(e.to_string())),
        }
    }

    async fn set(&self, address: Address, payload: Vec<u8>, mode: WriteMode) -> Result<(), SiloError> {
        let new_size = payload.len() as u64;
        {
            let sizes = self.sizes.lock();
            let used = self.used.lock();
            let previous_size = match sizes.get(&address) {
                Some(_) if !mode.update => return Err(SiloError::Collision(address)),
                Some(size) => *size,
                None if !mode.insert => return Err(SiloError::MissingKey(address)),
                None => 0,
            };
            if let Some(capacity) = self.capacity {
                let projected = *used - previous_size + new_size;
                if projected > capacity {
                    return Err(SiloError::InsufficientSpace {
                        requested: new_size,
                        available: capacity.saturating_sub(*used - previous_size),
                    });
                }
            }
        }

        let path = self.path_for(&address);
        let parent = path.parent().expect("path_for always has a shard parent");
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SiloError::Io(e.to_string()))?;
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &payload)
            .await
            .map_err(|e| SiloError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| SiloError::Io(e.to_string()))?;

        let mut sizes = self.sizes.lock();
        let mut used = self.used.lock();
        let previous_size = sizes.insert(address, new_size).unwrap_or(0);
        *used = *used - previous_size + new_size;
        drop(sizes);
        drop(used);
        self.notify();
        Ok(())
    }

    async fn erase(&self, address: &Address) -> Result<(), SiloError> {
        if !self.sizes.lock().contains_key(address) {
            return Err(SiloError::MissingKey(*address));
        }
        match tokio::fs::remove_file(self.path_for(address)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(SiloError::Io(e.to_string())),
        }
        let mut sizes = self.sizes.lock();
        let mut used = self.used.lock();
        if let Some(removed) = sizes.remove(address) {
            *used -= removed;
        }
        drop(sizes);
        drop(used);
        self.notify();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Address>, SiloError> {
        Ok(self.sizes.lock().keys().copied().collect())
    }

    async fn status(&self, address: &Address) -> Result<SiloStatus, SiloError> {
        let cached = self.sizes.lock().contains_key(address);
        if !cached {
            return Ok(SiloStatus::Missing);
        }
        match tokio::fs::metadata(self.path_for(address)).await {
            Ok(_) => Ok(SiloStatus::Exists),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(SiloStatus::Unknown),
            Err(e) => Err(SiloError::Io(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doughnut_types::AddressFlags;

    #[tokio::test]
    async fn set_get_erase_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let silo = FilesystemSilo::new(dir.path().to_path_buf(), None).await.unwrap();
        let address = Address::new([3u8; 32], AddressFlags::Unflagged);
        silo.set(address, b"payload".to_vec(), WriteMode::UPSERT).await.unwrap();
        assert_eq!(silo.get(&address).await.unwrap(), Some(b"payload".to_vec()));
        silo.erase(&address).await.unwrap();
        assert_eq!(silo.get(&address).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reopening_rebuilds_size_cache_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let address = Address::new([4u8; 32], AddressFlags::Unflagged);
        {
            let silo = FilesystemSilo::new(dir.path().to_path_buf(), None).await.unwrap();
            silo.set(address, b"durable".to_vec(), WriteMode::UPSERT).await.unwrap();
        }
        let reopened = FilesystemSilo::new(dir.path().to_path_buf(), None).await.unwrap();
        assert_eq!(reopened.get(&address).await.unwrap(), Some(b"durable".to_vec()));
        assert_eq!(reopened.list().await.unwrap(), vec![address]);
    }

    #[tokio::test]
    async fn capacity_rejects_oversized_write() {
        let dir = tempfile::tempdir().unwrap();
        let silo = FilesystemSilo::new(dir.path().to_path_buf(), Some(4)).await.unwrap();
        let address = Address::new([5u8; 32], AddressFlags::Unflagged);
        let err = silo.set(address, b"too long".to_vec(), WriteMode::UPSERT).await.unwrap_err();
        assert!(matches!(err, SiloError::InsufficientSpace { .. }));
    }

    #[tokio::test]
    async fn set_notifies_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let silo = FilesystemSilo::new(dir.path().to_path_buf(), None).await.unwrap();
        let mut rx = silo.subscribe();
        let address = Address::new([6u8; 32], AddressFlags::Unflagged);
        silo.set(address, b"x".to_vec(), WriteMode::UPSERT).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }

    #[tokio::test]
    async fn update_only_fails_on_absent_key() {
        let dir = tempfile::tempdir().unwrap();
        let silo = FilesystemSilo::new(dir.path().to_path_buf(), None).await.unwrap();
        let address = Address::new([7u8; 32], AddressFlags::Unflagged);
        let err = silo.set(address, b"v".to_vec(), WriteMode::UPDATE_ONLY).await.unwrap_err();
        assert!(matches!(err, SiloError::MissingKey(_)));
    }

    #[tokio::test]
    async fn erase_fails_on_absent_key() {
        let dir = tempfile::tempdir().unwrap();
        let silo = FilesystemSilo::new(dir.path().to_path_buf(), None).await.unwrap();
        let address = Address::new([8u8; 32], AddressFlags::Unflagged);
        let err = silo.erase(&address).await.unwrap_err();
        assert!(matches!(err, SiloError::MissingKey(_)));
    }
}
