//! The closed set of block variants and the operations every address in the
//! Silo is validated through (SPEC_FULL.md §3.2, §3.3).
//!
//! There is no open-world extensibility requirement here (SPEC_FULL.md §6,
//! Non-goals): new block kinds are a protocol version bump, not a plugin
//! point, so `Block` is a plain tagged enum rather than a trait object.
//! `BlockOps` still exists as a named seam: `doughnut-local`, `doughnut-
//! paxos`, and `doughnut-cache` depend on it rather than matching on `Block`
//! directly, the way `qc-02-block-storage`'s `ports::outbound` traits
//! decouple `service/` from `domain/`.

use doughnut_crypto::{KeyPair, PublicKey, Signature};
use doughnut_types::{Address, BlockError};
use serde::{Deserialize, Serialize};

use crate::domain::acb::Acb;
use crate::domain::chb::Chb;
use crate::domain::gb::Gb;
use crate::domain::nb::Nb;
use crate::domain::okb::Okb;

/// Proof of authorization to remove a block from the Silo (SPEC_FULL.md
/// §3.2 "remove"). `signer` is `None` only for unowned CHBs, where removal
/// requires no proof at all.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoveSignature {
    pub signer: Option<PublicKey>,
    pub signature: Signature,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Block {
    Chb(Chb),
    Okb(Okb),
    Acb(Acb),
    Nb(Nb),
    Gb(Gb),
}

impl Block {
    pub fn address(&self) -> Address {
        match self {
            Block::Chb(b) => b.address(),
            Block::Okb(b) => b.address(),
            Block::Acb(b) => b.address(),
            Block::Nb(b) => b.address(),
            Block::Gb(b) => b.address(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Block::Chb(_) => "CHB",
            Block::Okb(_) => "OKB",
            Block::Acb(_) => "ACB",
            Block::Nb(_) => "NB",
            Block::Gb(_) => "GB",
        }
    }

    /// The raw bytes stored at this address: plaintext for CHB/OKB/NB,
    /// ciphertext for ACB/GB (decrypting those requires a reader's keypair,
    /// see `Acb::decrypt_with`).
    pub fn payload(&self) -> &[u8] {
        match self {
            Block::Chb(b) => b.payload(),
            Block::Okb(b) => b.payload(),
            Block::Acb(b) => b.ciphertext(),
            Block::Nb(b) => b.payload(),
            Block::Gb(b) => b.base().ciphertext(),
        }
    }

    /// The monotonic version counter for variants that have one (OKB, ACB,
    /// GB via its `Acb` base). CHB and NB have no version: a CHB is
    /// immutable and an NB's replacement rule is identity, not ordering.
    pub fn version(&self) -> Option<u64> {
        match self {
            Block::Chb(_) => None,
            Block::Okb(b) => Some(b.version()),
            Block::Acb(b) => Some(b.version()),
            Block::Nb(_) => None,
            Block::Gb(b) => Some(b.base().version()),
        }
    }

    /// The key identifying this block's owner, or `None` for an
    /// ownerless CHB (spec.md §4.3's key_hash_lookup exchanges whichever
    /// owner/editor keys pass through a block on the wire).
    pub fn owner_key(&self) -> Option<PublicKey> {
        match self {
            Block::Chb(_) => None,
            Block::Okb(b) => Some(*b.owner_key()),
            Block::Acb(b) => Some(*b.owner_key()),
            Block::Nb(b) => Some(*b.owner_key()),
            Block::Gb(b) => Some(*b.base().owner_key()),
        }
    }

    /// Invariant 1 (SPEC §3.3): every block must validate against its own
    /// address and signatures before the Silo will store it.
    pub fn validate(&self) -> Result<(), BlockError> {
        match self {
            Block::Chb(b) => b.validate(),
            Block::Okb(b) => b.validate(),
            Block::Acb(b) => b.validate(),
            Block::Nb(b) => b.validate(),
            Block::Gb(b) => b.validate(),
        }
    }

    /// Invariants 2-4 (SPEC §3.3): whether `new` is an acceptable successor
    /// to `self` at the same address. Variant mismatches are always
    /// rejected; a CHB can never replace an OKB at the same address and
    /// so on, since their address derivations never collide by
    /// construction.
    pub fn validate_replacement(&self, new: &Block) -> Result<(), BlockError> {
        match (self, new) {
            (Block::Chb(old), Block::Chb(new)) => old.validate_replacement(new),
            (Block::Okb(old), Block::Okb(new)) => old.validate_replacement(new),
            (Block::Acb(old), Block::Acb(new)) => old.validate_replacement(new),
            (Block::Nb(old), Block::Nb(new)) => old.validate_replacement(new),
            (Block::Gb(old), Block::Gb(new)) => old.validate_replacement(new),
            _ => Err(BlockError::AddressMismatch {
                computed: new.address(),
                stored: self.address(),
            }),
        }
    }

    pub fn sign_remove(&self, signer: Option<&KeyPair>) -> Result<RemoveSignature, BlockError> {
        match self {
            Block::Chb(b) => Ok(b.sign_remove(signer)),
            Block::Okb(b) => signer
                .map(|kp| b.sign_remove(kp))
                .ok_or(BlockError::InvalidRemoveSignature),
            Block::Acb(b) => signer
                .map(|kp| b.sign_remove(kp))
                .ok_or(BlockError::InvalidRemoveSignature),
            Block::Nb(b) => signer
                .map(|kp| b.sign_remove(kp))
                .ok_or(BlockError::InvalidRemoveSignature),
            Block::Gb(b) => signer
                .map(|kp| b.sign_remove(kp))
                .ok_or(BlockError::InvalidRemoveSignature),
        }
    }

    pub fn validate_remove(
        &self,
        owner_key: Option<&PublicKey>,
        sig: &RemoveSignature,
    ) -> Result<(), BlockError> {
        match self {
            Block::Chb(b) => b.validate_remove(owner_key, sig),
            Block::Okb(b) => b.validate_remove(sig),
            Block::Acb(b) => b.validate_remove(sig),
            Block::Nb(b) => b.validate_remove(sig),
            Block::Gb(b) => b.validate_remove(sig),
        }
    }
}

/// Named seam between the block model and the consensus/storage layers
/// above it, so they depend on a trait rather than matching on `Block`
/// directly.
pub trait BlockOps {
    fn address(&self) -> Address;
    fn kind(&self) -> &'static str;
    fn payload(&self) -> &[u8];
    fn validate(&self) -> Result<(), BlockError>;
    fn validate_replacement(&self, new: &Block) -> Result<(), BlockError>;
}

impl BlockOps for Block {
    fn address(&self) -> Address {
        Block::address(self)
    }

    fn kind(&self) -> &'static str {
        Block::kind(self)
    }

    fn payload(&self) -> &[u8] {
        Block::payload(self)
    }

    fn validate(&self) -> Result<(), BlockError> {
        Block::validate(self)
    }

    fn validate_replacement(&self, new: &Block) -> Result<(), BlockError> {
        Block::validate_replacement(self, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doughnut_crypto::KeyPair;

    #[test]
    fn mismatched_variants_never_replace_each_other() {
        let chb = Block::Chb(Chb::new(b"hello".to_vec(), None));
        let owner = KeyPair::generate();
        let okb = Block::Okb(Okb::new(owner.public_key(), [0u8; 16], b"v0".to_vec()));
        assert!(chb.validate_replacement(&okb).is_err());
    }

    #[test]
    fn chb_remove_needs_no_signer_when_unowned() {
        let chb = Block::Chb(Chb::new(b"hello".to_vec(), None));
        let sig = chb.sign_remove(None).unwrap();
        assert!(chb.validate_remove(None, &sig).is_ok());
    }

    #[test]
    fn okb_remove_requires_a_signer() {
        let owner = KeyPair::generate();
        let okb = Block::Okb(Okb::new(owner.public_key(), [0u8; 16], b"v0".to_vec()));
        assert!(okb.sign_remove(None).is_err());
        let sig = okb.sign_remove(Some(&owner)).unwrap();
        assert!(okb.validate_remove(Some(&owner.public_key()), &sig).is_ok());
    }
}
