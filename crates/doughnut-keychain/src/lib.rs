//! # Keychain
//!
//! A bounded `ShortHash -> PublicKey` cache, one per `Connection`
//! (SPEC_FULL.md §4.3 "per-connection for correctness"): peers exchange
//! short hashes instead of full 32-byte keys on the wire once a key has
//! been seen, and the keychain is how a connection recovers the full key.
//!
//! Grounded on `qc-01-peer-discovery::domain::enr::cache::EnrCache`'s
//! bounded-with-GC shape, with ENR's age-based GC replaced by a plain LRU
//! ring since a keychain entry has no natural expiry, only a capacity bound.

use std::collections::{HashMap, VecDeque};

use doughnut_crypto::PublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An 8-byte digest of a public key, the wire-compact identifier peers use
/// once the corresponding key is already known to both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShortHash(pub [u8; 8]);

impl ShortHash {
    pub fn of(key: &PublicKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest[..8]);
        Self(out)
    }
}

/// Bounded cache mapping short hashes back to full public keys. Insertion
/// order doubles as recency; the least-recently-touched entry is evicted
/// when the cache is full.
pub struct KeyChain {
    capacity: usize,
    entries: HashMap<ShortHash, PublicKey>,
    recency: VecDeque<ShortHash>,
}

impl KeyChain {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    /// Remember `key`, returning its short hash. Re-inserting a known key
    /// just refreshes its recency.
    pub fn insert(&mut self, key: PublicKey) -> ShortHash {
        let short = ShortHash::of(&key);
        if self.entries.contains_key(&short) {
            self.touch(&short);
            return short;
        }
        self.entries.insert(short, key);
        self.recency.push_back(short);
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.recency.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        short
    }

    pub fn get(&mut self, short: &ShortHash) -> Option<PublicKey> {
        let key = self.entries.get(short).copied();
        if key.is_some() {
            self.touch(short);
        }
        key
    }

    fn touch(&mut self, short: &ShortHash) {
        if let Some(pos) = self.recency.iter().position(|s| s == short) {
            self.recency.remove(pos);
        }
        self.recency.push_back(*short);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doughnut_crypto::KeyPair;

    #[test]
    fn insert_then_get_roundtrips() {
        let mut chain = KeyChain::new(4);
        let key = KeyPair::generate().public_key();
        let short = chain.insert(key);
        assert_eq!(chain.get(&short), Some(key));
    }

    #[test]
    fn evicts_least_recently_used_beyond_capacity() {
        let mut chain = KeyChain::new(2);
        let a = KeyPair::generate().public_key();
        let b = KeyPair::generate().public_key();
        let c = KeyPair::generate().public_key();
        let short_a = chain.insert(a);
        chain.insert(b);
        chain.insert(c);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.get(&short_a), None);
    }

    #[test]
    fn touching_a_key_protects_it_from_eviction() {
        let mut chain = KeyChain::new(2);
        let a = KeyPair::generate().public_key();
        let b = KeyPair::generate().public_key();
        let c = KeyPair::generate().public_key();
        let short_a = chain.insert(a);
        chain.insert(b);
        assert_eq!(chain.get(&short_a), Some(a));
        chain.insert(c);
        assert_eq!(chain.get(&short_a), Some(a));
    }
}
