//! Content-hash block (CHB): immutable, address derived from content.

use doughnut_crypto::{content_hash, KeyPair, PublicKey, Signature};
use doughnut_types::{Address, AddressFlags, BlockError};
use serde::{Deserialize, Serialize};

use crate::domain::block::RemoveSignature;

/// An immutable block whose address is `H(payload, owner_address?)`
/// (SPEC_FULL.md §3.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chb {
    address: Address,
    payload: Vec<u8>,
    /// The mutable block that owns this CHB, if any. Removal is then
    /// gated on proving ownership of that address (SPEC §3.2).
    owner_address: Option<Address>,
    compat_version: u16,
}

impl Chb {
    pub fn compute_address(payload: &[u8], owner_address: Option<&Address>) -> Address {
        let owner_bytes = owner_address.map(|a| a.to_bytes()).unwrap_or([0u8; 33]);
        let hash = content_hash(&[payload, &owner_bytes]);
        Address::new(hash, AddressFlags::Immutable)
    }

    pub fn new(payload: Vec<u8>, owner_address: Option<Address>) -> Self {
        let address = Self::compute_address(&payload, owner_address.as_ref());
        Self {
            address,
            payload,
            owner_address,
            compat_version: doughnut_types::SUPPORTED_VERSION_MAX,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn owner_address(&self) -> Option<Address> {
        self.owner_address
    }

    /// Invariant 1 (SPEC §3.3): address must match recomputed hash.
    pub fn validate(&self) -> Result<(), BlockError> {
        if self.compat_version > doughnut_types::SUPPORTED_VERSION_MAX {
            return Err(BlockError::UnsupportedVersion(self.compat_version));
        }
        let expected = Self::compute_address(&self.payload, self.owner_address.as_ref());
        if !expected.eq_ignoring_flags(&self.address) {
            return Err(BlockError::AddressMismatch {
                computed: expected,
                stored: self.address,
            });
        }
        Ok(())
    }

    /// CHBs accept any replacement only if it is bit-identical; the normal
    /// path is "insert once", so a replacement attempt is always a
    /// collision the Silo layer rejects before block validation even runs.
    pub fn validate_replacement(&self, new: &Chb) -> Result<(), BlockError> {
        if self.payload == new.payload && self.owner_address == new.owner_address {
            Ok(())
        } else {
            Err(BlockError::AddressMismatch {
                computed: new.address,
                stored: self.address,
            })
        }
    }

    /// Sign a removal request: if there is no owning mutable block, anyone
    /// may remove (SPEC §3.2), and the signature is just a statement of
    /// intent over the address. If there is an owner, the signer must be
    /// that owner's keypair.
    pub fn sign_remove(&self, signer: Option<&KeyPair>) -> RemoveSignature {
        match signer {
            Some(kp) => RemoveSignature {
                signer: Some(kp.public_key()),
                signature: kp.sign(&self.address.to_bytes()),
            },
            None => RemoveSignature {
                signer: None,
                signature: Signature::from_bytes([0u8; 64]),
            },
        }
    }

    pub fn validate_remove(
        &self,
        owner_key: Option<&PublicKey>,
        sig: &RemoveSignature,
    ) -> Result<(), BlockError> {
        match (self.owner_address, owner_key) {
            (None, _) => Ok(()),
            (Some(_), Some(owner_key)) => {
                let signer = sig.signer.ok_or(BlockError::InvalidRemoveSignature)?;
                if &signer != owner_key {
                    return Err(BlockError::InvalidRemoveSignature);
                }
                owner_key
                    .verify(&self.address.to_bytes(), &sig.signature)
                    .map_err(|_| BlockError::InvalidRemoveSignature)
            }
            (Some(_), None) => Err(BlockError::InvalidRemoveSignature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_matches_hash_of_payload() {
        let chb = Chb::new(b"hello".to_vec(), None);
        assert_eq!(chb.address(), Chb::compute_address(b"hello", None));
    }

    #[test]
    fn validate_rejects_tampered_payload() {
        let mut chb = Chb::new(b"hello".to_vec(), None);
        chb.payload = b"goodbye".to_vec();
        assert!(chb.validate().is_err());
    }

    #[test]
    fn unowned_chb_removable_without_signature() {
        let chb = Chb::new(b"hello".to_vec(), None);
        let sig = chb.sign_remove(None);
        assert!(chb.validate_remove(None, &sig).is_ok());
    }

    #[test]
    fn owned_chb_requires_owner_signature() {
        let owner = KeyPair::generate();
        let owner_addr = Address::new([9u8; 32], AddressFlags::Mutable);
        let chb = Chb::new(b"hello".to_vec(), Some(owner_addr));
        let sig = chb.sign_remove(Some(&owner));
        assert!(chb
            .validate_remove(Some(&owner.public_key()), &sig)
            .is_ok());

        let impostor = KeyPair::generate();
        let bad_sig = chb.sign_remove(Some(&impostor));
        assert!(chb
            .validate_remove(Some(&owner.public_key()), &bad_sig)
            .is_err());
    }
}
