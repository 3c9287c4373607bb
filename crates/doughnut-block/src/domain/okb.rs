//! Owner key block (OKB): mutable, owner-signed, strictly monotonic version.

use doughnut_crypto::{content_hash, KeyPair, PublicKey, Signature};
use doughnut_types::{Address, AddressFlags, BlockError};
use serde::{Deserialize, Serialize};

use crate::domain::block::RemoveSignature;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Okb {
    address: Address,
    owner_key: PublicKey,
    salt: [u8; 16],
    version: u64,
    payload: Vec<u8>,
    signature: Option<Signature>,
    compat_version: u16,
}

impl Okb {
    pub fn compute_address(owner_key: &PublicKey, salt: &[u8; 16]) -> Address {
        let hash = content_hash(&[owner_key.as_bytes(), salt]);
        Address::new(hash, AddressFlags::Mutable)
    }

    pub fn new(owner_key: PublicKey, salt: [u8; 16], payload: Vec<u8>) -> Self {
        let address = Self::compute_address(&owner_key, &salt);
        Self {
            address,
            owner_key,
            salt,
            version: 0,
            payload,
            signature: None,
            compat_version: doughnut_types::SUPPORTED_VERSION_MAX,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner_key(&self) -> &PublicKey {
        &self.owner_key
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.owner_key.as_bytes());
        buf.extend_from_slice(&self.salt);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Seal: bump the version and sign `(owner_key, salt, version,
    /// payload)`. Signing is CPU-bound, so callers should run this inside
    /// `tokio::task::spawn_blocking` (SPEC_FULL.md §4.2, §9 "Background
    /// signing") — done one layer up in `Block::seal` so every variant
    /// shares the same offload path.
    pub fn seal_with(&mut self, owner: &KeyPair, bump_version: bool) -> Result<(), BlockError> {
        if owner.public_key() != self.owner_key {
            return Err(BlockError::EditorNotAuthorized(*self.owner_key.as_bytes()));
        }
        if bump_version {
            self.version += 1;
        }
        self.signature = Some(owner.sign(&self.signing_payload()));
        Ok(())
    }

    pub fn validate(&self) -> Result<(), BlockError> {
        if self.compat_version > doughnut_types::SUPPORTED_VERSION_MAX {
            return Err(BlockError::UnsupportedVersion(self.compat_version));
        }
        let expected = Self::compute_address(&self.owner_key, &self.salt);
        if !expected.eq_ignoring_flags(&self.address) {
            return Err(BlockError::AddressMismatch {
                computed: expected,
                stored: self.address,
            });
        }
        let sig = self.signature.as_ref().ok_or(BlockError::InvalidSignature)?;
        self.owner_key
            .verify(&self.signing_payload(), sig)
            .map_err(|_| BlockError::InvalidSignature)
    }

    /// Invariant 2 (SPEC §3.3): version strictly increases on replacement.
    pub fn validate_replacement(&self, new: &Okb) -> Result<(), BlockError> {
        new.validate()?;
        if new.owner_key != self.owner_key {
            return Err(BlockError::InvalidSignature);
        }
        if new.version != self.version + 1 {
            return Err(BlockError::VersionRegression {
                old: self.version,
                new: new.version,
            });
        }
        Ok(())
    }

    pub fn sign_remove(&self, owner: &KeyPair) -> RemoveSignature {
        RemoveSignature {
            signer: Some(owner.public_key()),
            signature: owner.sign(&self.address.to_bytes()),
        }
    }

    pub fn validate_remove(&self, sig: &RemoveSignature) -> Result<(), BlockError> {
        let signer = sig.signer.ok_or(BlockError::InvalidRemoveSignature)?;
        if signer != self.owner_key {
            return Err(BlockError::InvalidRemoveSignature);
        }
        self.owner_key
            .verify(&self.address.to_bytes(), &sig.signature)
            .map_err(|_| BlockError::InvalidRemoveSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_bumps_version_and_signs() {
        let owner = KeyPair::generate();
        let mut okb = Okb::new(owner.public_key(), [1u8; 16], b"v0".to_vec());
        okb.seal_with(&owner, true).unwrap();
        assert_eq!(okb.version(), 1);
        assert!(okb.validate().is_ok());
    }

    #[test]
    fn replacement_requires_version_plus_one() {
        let owner = KeyPair::generate();
        let mut okb = Okb::new(owner.public_key(), [1u8; 16], b"v0".to_vec());
        okb.seal_with(&owner, true).unwrap();

        let mut skip = okb.clone();
        skip.set_payload(b"v2".to_vec());
        skip.version = 3;
        skip.seal_with(&owner, false).unwrap();
        assert!(okb.validate_replacement(&skip).is_err());

        let mut next = okb.clone();
        next.set_payload(b"v1".to_vec());
        next.seal_with(&owner, true).unwrap();
        assert!(okb.validate_replacement(&next).is_ok());
    }

    #[test]
    fn non_owner_cannot_seal() {
        let owner = KeyPair::generate();
        let impostor = KeyPair::generate();
        let mut okb = Okb::new(owner.public_key(), [1u8; 16], b"v0".to_vec());
        assert!(okb.seal_with(&impostor, true).is_err());
    }
}
