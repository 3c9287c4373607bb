//! Content hashing used to derive block addresses (SPEC_FULL.md §3.2).

use sha2::{Digest, Sha256};

/// Hash an arbitrary sequence of byte slices into a 32-byte content hash,
/// the `H(...)` function referenced throughout the block model
/// (`H(payload, owner)`, `H(owner_key, salt)`, `H("NB" || owner_key ||
/// name)`).
pub fn content_hash(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_order_sensitive() {
        let a = content_hash(&[b"hello", b"world"]);
        let b = content_hash(&[b"hello", b"world"]);
        let c = content_hash(&[b"world", b"hello"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
