//! # Address
//!
//! A 33-byte block identifier: 32 content bytes plus a flag byte encoding
//! the block class. See SPEC_FULL.md §3.1.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Block class and legacy-compatibility bits carried in the flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFlags {
    /// Pre-flag-byte legacy address; compares equal to any class.
    Unflagged,
    Mutable,
    Immutable,
    Named,
}

impl AddressFlags {
    const UNFLAGGED: u8 = 0;
    const MUTABLE: u8 = 1;
    const IMMUTABLE: u8 = 2;
    const NAMED: u8 = 3;

    fn from_byte(b: u8) -> AddressFlags {
        match b {
            Self::MUTABLE => AddressFlags::Mutable,
            Self::IMMUTABLE => AddressFlags::Immutable,
            Self::NAMED => AddressFlags::Named,
            _ => AddressFlags::Unflagged,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            AddressFlags::Unflagged => Self::UNFLAGGED,
            AddressFlags::Mutable => Self::MUTABLE,
            AddressFlags::Immutable => Self::IMMUTABLE,
            AddressFlags::Named => Self::NAMED,
        }
    }
}

/// 33-byte content-addressed identifier (32-byte content hash + flag byte).
///
/// `Address` is a value type: it never owns the block it names.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    content: [u8; 32],
    flag: u8,
}

impl Address {
    pub fn new(content: [u8; 32], flags: AddressFlags) -> Self {
        Self {
            content,
            flag: flags.to_byte(),
        }
    }

    pub fn content(&self) -> &[u8; 32] {
        &self.content
    }

    pub fn flags(&self) -> AddressFlags {
        AddressFlags::from_byte(self.flag)
    }

    /// Re-derive this address under a different flag byte, keeping the
    /// content hash. Used when a mutable block family wants to reference
    /// the same identity under another class (SPEC_FULL.md §3.1).
    pub fn with_flags(&self, flags: AddressFlags) -> Self {
        Self {
            content: self.content,
            flag: flags.to_byte(),
        }
    }

    /// Equality that disregards the flag byte, for legacy/unflagged
    /// addresses (SPEC §3.1 "unflagged equality").
    pub fn eq_ignoring_flags(&self, other: &Address) -> bool {
        self.content == other.content
    }

    /// Serialize to the canonical 33 raw bytes (SPEC §6.4).
    pub fn to_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[..32].copy_from_slice(&self.content);
        out[32] = self.flag;
        out
    }

    pub fn from_bytes(bytes: [u8; 33]) -> Self {
        let mut content = [0u8; 32];
        content.copy_from_slice(&bytes[..32]);
        Self {
            content,
            flag: bytes[32],
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}, {:?})", hex::encode(self.content), self.flags())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(deserializer)?;
        let arr: [u8; 33] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("address must be exactly 33 bytes"))?;
        Ok(Address::from_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_bytes() {
        let a = Address::new([7u8; 32], AddressFlags::Mutable);
        let bytes = a.to_bytes();
        let b = Address::from_bytes(bytes);
        assert_eq!(a, b);
    }

    #[test]
    fn eq_ignoring_flags_matches_content_only() {
        let a = Address::new([1u8; 32], AddressFlags::Mutable);
        let b = Address::new([1u8; 32], AddressFlags::Immutable);
        assert_ne!(a, b);
        assert!(a.eq_ignoring_flags(&b));
    }

    #[test]
    fn with_flags_preserves_content() {
        let a = Address::new([9u8; 32], AddressFlags::Named);
        let b = a.with_flags(AddressFlags::Mutable);
        assert_eq!(a.content(), b.content());
        assert_eq!(b.flags(), AddressFlags::Mutable);
    }

    #[test]
    fn serde_roundtrip() {
        let a = Address::new([3u8; 32], AddressFlags::Immutable);
        let encoded = bincode::serialize(&a).unwrap();
        let decoded: Address = bincode::deserialize(&encoded).unwrap();
        assert_eq!(a, decoded);
    }
}
