//! # Silo
//!
//! Address-keyed byte storage, the bottom of the Doughnut stack
//! (SPEC_FULL.md §4.1). Grounded on `qc-02-block-storage::ports::outbound::
//! KeyValueStore`: same `get`/`put`/`delete` shape, keyed by `Address`
//! instead of raw bytes, with its dual in-memory/file-backed adapter pair
//! (`InMemoryKVStore` / `FileBackedKVStore`) carried over as `MemorySilo` /
//! `FilesystemSilo`.

mod filesystem;
mod memory;

pub use filesystem::FilesystemSilo;
pub use memory::MemorySilo;

use async_trait::async_trait;
use doughnut_types::{Address, SiloError};

/// Whether an address is known to be present. `Unknown` is reachable only
/// through a decorator over a racy backend (`FilesystemSilo`, when a read
/// loses a race against a concurrent unlink); `MemorySilo` never returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiloStatus {
    Exists,
    Missing,
    Unknown,
}

/// Write semantics for [`Silo::set`], matching SPEC_FULL.md §4.1's
/// `set(k, v, insert, update)` flags: `insert` allows the write when
/// `address` is absent, `update` allows it when present. Setting only one
/// restricts the call to that case and fails otherwise; setting both is an
/// unconditional upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMode {
    pub insert: bool,
    pub update: bool,
}

impl WriteMode {
    pub const UPSERT: WriteMode = WriteMode { insert: true, update: true };
    pub const INSERT_ONLY: WriteMode = WriteMode { insert: true, update: false };
    pub const UPDATE_ONLY: WriteMode = WriteMode { insert: false, update: true };
}

/// Address-keyed block storage. Implementations are dumb byte stores: they
/// know nothing about block variants or validation, which stays in
/// `doughnut-block`/`doughnut-local` (SPEC_FULL.md §4.1/§4.6).
#[async_trait]
pub trait Silo: Send + Sync {
    /// Fetch the raw bytes stored at `address`, or `None` if absent.
    async fn get(&self, address: &Address) -> Result<Option<Vec<u8>>, SiloError>;

    /// Write `address` under `mode`: fails with `Collision` if insert-only
    /// and `address` is already present, `MissingKey` if update-only and
    /// absent, `InsufficientSpace` if capacity would be exceeded.
    async fn set(&self, address: Address, payload: Vec<u8>, mode: WriteMode) -> Result<(), SiloError>;

    /// Insert `address` only if it is not already present.
    async fn try_insert(&self, address: Address, payload: Vec<u8>) -> Result<(), SiloError> {
        self.set(address, payload, WriteMode::INSERT_ONLY).await
    }

    /// Remove `address`. Fails with `MissingKey` if `address` is absent.
    async fn erase(&self, address: &Address) -> Result<(), SiloError>;

    /// All addresses currently stored. Unordered.
    async fn list(&self) -> Result<Vec<Address>, SiloError>;

    async fn status(&self, address: &Address) -> Result<SiloStatus, SiloError> {
        Ok(if self.get(address).await?.is_some() {
            SiloStatus::Exists
        } else {
            SiloStatus::Missing
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_insert_detects_collision_for_any_silo() {
        for silo in silos_under_test().await {
            let address = Address::new([1u8; 32], doughnut_types::AddressFlags::Unflagged);
            silo.try_insert(address, b"first".to_vec()).await.unwrap();
            let err = silo
                .try_insert(address, b"second".to_vec())
                .await
                .unwrap_err();
            assert!(matches!(err, SiloError::Collision(_)));
        }
    }

    #[tokio::test]
    async fn update_only_fails_when_absent_for_any_silo() {
        for silo in silos_under_test().await {
            let address = Address::new([2u8; 32], doughnut_types::AddressFlags::Unflagged);
            let err = silo
                .set(address, b"v0".to_vec(), WriteMode::UPDATE_ONLY)
                .await
                .unwrap_err();
            assert!(matches!(err, SiloError::MissingKey(_)));

            silo.set(address, b"v0".to_vec(), WriteMode::INSERT_ONLY).await.unwrap();
            silo.set(address, b"v1".to_vec(), WriteMode::UPDATE_ONLY).await.unwrap();
        }
    }

    #[tokio::test]
    async fn erase_fails_when_absent_for_any_silo() {
        for silo in silos_under_test().await {
            let address = Address::new([3u8; 32], doughnut_types::AddressFlags::Unflagged);
            let err = silo.erase(&address).await.unwrap_err();
            assert!(matches!(err, SiloError::MissingKey(_)));

            silo.set(address, b"v0".to_vec(), WriteMode::UPSERT).await.unwrap();
            silo.erase(&address).await.unwrap();
        }
    }

    async fn silos_under_test() -> Vec<Box<dyn Silo>> {
        let dir = tempfile::tempdir().unwrap();
        vec![
            Box::new(MemorySilo::new(None)),
            Box::new(FilesystemSilo::new(dir.into_path(), None).await.unwrap()),
        ]
    }
}
