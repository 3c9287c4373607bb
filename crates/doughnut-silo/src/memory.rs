//! In-memory Silo adapter. Grounded on `qc-02-block-storage::ports::
//! outbound::InMemoryKVStore`.

use std::collections::HashMap;

use async_trait::async_trait;
use doughnut_types::{Address, SiloError};
use parking_lot::Mutex;

use crate::{Silo, WriteMode};

/// `HashMap<Address, Vec<u8>>` behind a `parking_lot::Mutex`, the way the
/// teacher guards its shared in-process state workspace-wide.
pub struct MemorySilo {
    data: Mutex<HashMap<Address, Vec<u8>>>,
    capacity: Option<u64>,
    used: Mutex<u64>,
}

impl MemorySilo {
    pub fn new(capacity: Option<u64>) -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            capacity,
            used: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Silo for MemorySilo {
    async fn get(&self, address: &Address) -> Result<Option<Vec<u8>>, SiloError> {
        Ok(self.data.lock().get(address).cloned())
    }

    async fn set(&self, address: Address, payload: Vec<u8>, mode: WriteMode) -> Result<(), SiloError> {
        let mut data = self.data.lock();
        let mut used = self.used.lock();
        let previous_size = match data.get(&address) {
            Some(_) if !mode.update => return Err(SiloError::Collision(address)),
            Some(existing) => existing.len() as u64,
            None if !mode.insert => return Err(SiloError::MissingKey(address)),
            None => 0,
        };
        let new_size = payload.len() as u64;
        if let Some(capacity) = self.capacity {
            let projected = *used - previous_size + new_size;
            if projected > capacity {
                return Err(SiloError::InsufficientSpace {
                    requested: new_size,
                    available: capacity.saturating_sub(*used - previous_size),
                });
            }
        }
        *used = *used - previous_size + new_size;
        data.insert(address, payload);
        Ok(())
    }

    async fn erase(&self, address: &Address) -> Result<(), SiloError> {
        let mut data = self.data.lock();
        let mut used = self.used.lock();
        match data.remove(address) {
            Some(removed) => {
                *used -= removed.len() as u64;
                Ok(())
            }
            None => Err(SiloError::MissingKey(*address)),
        }
    }

    async fn list(&self) -> Result<Vec<Address>, SiloError> {
        Ok(self.data.lock().keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doughnut_types::AddressFlags;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let silo = MemorySilo::new(None);
        let address = Address::new([1u8; 32], AddressFlags::Unflagged);
        silo.set(address, b"hello".to_vec(), WriteMode::UPSERT).await.unwrap();
        assert_eq!(silo.get(&address).await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn erase_removes_and_frees_capacity() {
        let silo = MemorySilo::new(Some(10));
        let address = Address::new([1u8; 32], AddressFlags::Unflagged);
        silo.set(address, b"0123456789".to_vec(), WriteMode::UPSERT).await.unwrap();
        assert!(silo
            .set(Address::new([2u8; 32], AddressFlags::Unflagged), b"x".to_vec(), WriteMode::UPSERT)
            .await
            .is_err());
        silo.erase(&address).await.unwrap();
        assert!(silo
            .set(Address::new([2u8; 32], AddressFlags::Unflagged), b"x".to_vec(), WriteMode::UPSERT)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let silo = MemorySilo::new(Some(4));
        let address = Address::new([1u8; 32], AddressFlags::Unflagged);
        let err = silo.set(address, b"too long".to_vec(), WriteMode::UPSERT).await.unwrap_err();
        assert!(matches!(err, SiloError::InsufficientSpace { .. }));
    }

    #[tokio::test]
    async fn update_only_fails_on_absent_key() {
        let silo = MemorySilo::new(None);
        let address = Address::new([9u8; 32], AddressFlags::Unflagged);
        let err = silo.set(address, b"v".to_vec(), WriteMode::UPDATE_ONLY).await.unwrap_err();
        assert!(matches!(err, SiloError::MissingKey(_)));
    }

    #[tokio::test]
    async fn erase_fails_on_absent_key() {
        let silo = MemorySilo::new(None);
        let address = Address::new([9u8; 32], AddressFlags::Unflagged);
        let err = silo.erase(&address).await.unwrap_err();
        assert!(matches!(err, SiloError::MissingKey(_)));
    }
}
