//! # Shared Primitives
//!
//! Address and error types shared across every Doughnut subsystem crate.
//! This is the single source of truth for the wire-level identifiers, the
//! way `shared-types` is for Quantum-Chain's subsystems.

pub mod address;
pub mod errors;

pub use address::{Address, AddressFlags};
pub use errors::{BlockError, ConsensusError, SiloError};

/// A 32-byte content hash (SHA-256).
pub type Hash = [u8; 32];

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// Unix timestamp, seconds since epoch.
pub type Timestamp = u64;

/// Identifier for a peer in the overlay, independent of its current
/// network location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Compatibility version carried by every serialized block (SPEC §6.4).
pub const SUPPORTED_VERSION_MIN: u16 = 1;
pub const SUPPORTED_VERSION_MAX: u16 = 1;
