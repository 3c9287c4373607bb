//! The journal's secondary index: by-address lookups and the memory-bound
//! spill accounting, grounded on `qc-02-block-storage::domain::assembler::
//! BlockAssemblyBuffer`'s `HashMap<Hash, _>`-keyed pending buffer (here
//! paired with a `BTreeMap` for index-ordered draining, the two access
//! patterns `boost::multi_index_container` gave the original).

use std::collections::{BTreeMap, HashMap, VecDeque};

use doughnut_types::Address;

use crate::journal::JournalEntry;

/// Every pending index maps to its address (cheap, always resident) and,
/// while still within the `max_blocks` memory bound, to its full body. Once
/// spilled, the body is evicted but the address mapping stays so draining
/// and by-address lookups keep working, falling back to disk.
#[derive(Default)]
pub struct JournalIndex {
    addresses: BTreeMap<u64, Address>,
    bodies: HashMap<u64, JournalEntry>,
    by_address: HashMap<Address, VecDeque<u64>>,
    hops: HashMap<Address, u32>,
    first_disk_index: Option<u64>,
}

impl JournalIndex {
    /// The most recently queued entry for `address`, if its body is still
    /// resident. A coalescible write never looks past a spill boundary.
    pub fn latest_for(&self, address: Address) -> Option<JournalEntry> {
        let index = *self.by_address.get(&address)?.back()?;
        self.bodies.get(&index).cloned()
    }

    pub fn hops_for(&self, address: Address) -> u32 {
        self.hops.get(&address).copied().unwrap_or(0)
    }

    pub fn set_hops(&mut self, address: Address, hops: u32) {
        self.hops.insert(address, hops);
    }

    pub fn clear_hops(&mut self, address: Address) {
        self.hops.remove(&address);
    }

    pub fn insert(&mut self, entry: JournalEntry) {
        self.by_address.entry(entry.address).or_default().push_back(entry.index);
        self.addresses.insert(entry.index, entry.address);
        self.bodies.insert(entry.index, entry);
    }

    /// Drops an index entirely: it has been flushed to the backend and its
    /// journal file deleted.
    pub fn forget(&mut self, address: Address, index: u64) {
        self.addresses.remove(&index);
        self.bodies.remove(&index);
        if let Some(q) = self.by_address.get_mut(&address) {
            q.retain(|i| *i != index);
            if q.is_empty() {
                self.by_address.remove(&address);
            }
        }
    }

    pub fn oldest_index(&self) -> Option<u64> {
        self.addresses.keys().next().copied()
    }

    pub fn address_for(&self, index: u64) -> Option<Address> {
        self.addresses.get(&index).copied()
    }

    pub fn body_for(&self, index: u64) -> Option<JournalEntry> {
        self.bodies.get(&index).cloned()
    }

    pub fn resident_len(&self) -> usize {
        self.bodies.len()
    }

    /// Evicts a body from memory without forgetting the index exists; the
    /// journal file remains the only copy until flushed.
    pub fn evict_body(&mut self, index: u64) {
        self.bodies.remove(&index);
        self.first_disk_index = Some(match self.first_disk_index {
            Some(existing) => existing.min(index),
            None => index,
        });
    }

    pub fn first_disk_index(&self) -> Option<u64> {
        self.first_disk_index
    }

    pub fn pending_for(&self, address: Address) -> Vec<u64> {
        self.by_address.get(&address).map(|q| q.iter().copied().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Op;
    use doughnut_block::{Block, Chb};
    use doughnut_overlay::StoreMode;
    use doughnut_types::AddressFlags;

    fn entry(index: u64, address: Address) -> JournalEntry {
        JournalEntry {
            index,
            address,
            op: Op::Set {
                block: Block::Chb(Chb::new(b"x".to_vec(), None)),
                mode: StoreMode::Insert,
            },
            resolver: None,
        }
    }

    #[test]
    fn forgetting_an_index_drops_it_from_every_view() {
        let address = Address::new([1u8; 32], AddressFlags::Unflagged);
        let mut index = JournalIndex::default();
        index.insert(entry(0, address));
        index.insert(entry(1, address));
        assert_eq!(index.pending_for(address), vec![0, 1]);

        index.forget(address, 0);
        assert_eq!(index.pending_for(address), vec![1]);
        assert!(index.body_for(0).is_none());
        assert_eq!(index.latest_for(address).unwrap().index, 1);
    }

    #[test]
    fn evicting_a_body_keeps_the_address_mapping_but_not_the_data() {
        let address = Address::new([2u8; 32], AddressFlags::Unflagged);
        let mut index = JournalIndex::default();
        index.insert(entry(5, address));

        index.evict_body(5);
        assert_eq!(index.address_for(5), Some(address));
        assert!(index.body_for(5).is_none());
        assert_eq!(index.first_disk_index(), Some(5));
        assert!(index.latest_for(address).is_none());
    }
}
