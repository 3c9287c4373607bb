//! Named block (NB): address derived from `(owner_key, name)` rather than
//! content; "overwrite" is only accepted when it is a no-op (SPEC_FULL.md
//! §3.2).

use doughnut_crypto::{content_hash, KeyPair, PublicKey, Signature};
use doughnut_types::{Address, AddressFlags, BlockError};
use serde::{Deserialize, Serialize};

use crate::domain::block::RemoveSignature;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Nb {
    address: Address,
    owner_key: PublicKey,
    name: String,
    payload: Vec<u8>,
    signature: Option<Signature>,
    compat_version: u16,
}

impl Nb {
    pub fn compute_address(owner_key: &PublicKey, name: &str) -> Address {
        let hash = content_hash(&[b"NB", owner_key.as_bytes(), name.as_bytes()]);
        Address::new(hash, AddressFlags::Named)
    }

    pub fn new(owner_key: PublicKey, name: String, payload: Vec<u8>) -> Self {
        let address = Self::compute_address(&owner_key, &name);
        Self {
            address,
            owner_key,
            name,
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

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.owner_key.as_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn seal_with(&mut self, owner: &KeyPair) -> Result<(), BlockError> {
        if owner.public_key() != self.owner_key {
            return Err(BlockError::EditorNotAuthorized(*self.owner_key.as_bytes()));
        }
        self.signature = Some(owner.sign(&self.signing_payload()));
        Ok(())
    }

    pub fn validate(&self) -> Result<(), BlockError> {
        if self.compat_version > doughnut_types::SUPPORTED_VERSION_MAX {
            return Err(BlockError::UnsupportedVersion(self.compat_version));
        }
        let expected = Self::compute_address(&self.owner_key, &self.name);
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

    /// NBs are "immutable by overwrite identity": a second publish to the
    /// same address is only accepted if it carries exactly the same name,
    /// owner, and payload as the first (SPEC §3.2, §3.3 Invariant 4).
    pub fn validate_replacement(&self, new: &Nb) -> Result<(), BlockError> {
        new.validate()?;
        if new.owner_key == self.owner_key && new.name == self.name && new.payload == self.payload
        {
            Ok(())
        } else {
            Err(BlockError::NbOverwriteDenied)
        }
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
    fn identical_republish_is_accepted() {
        let owner = KeyPair::generate();
        let mut nb = Nb::new(owner.public_key(), "alias".to_string(), b"v0".to_vec());
        nb.seal_with(&owner).unwrap();

        let mut again = Nb::new(owner.public_key(), "alias".to_string(), b"v0".to_vec());
        again.seal_with(&owner).unwrap();
        assert!(nb.validate_replacement(&again).is_ok());
    }

    #[test]
    fn changed_payload_is_rejected() {
        let owner = KeyPair::generate();
        let mut nb = Nb::new(owner.public_key(), "alias".to_string(), b"v0".to_vec());
        nb.seal_with(&owner).unwrap();

        let mut changed = Nb::new(owner.public_key(), "alias".to_string(), b"v1".to_vec());
        changed.seal_with(&owner).unwrap();
        assert!(matches!(
            nb.validate_replacement(&changed),
            Err(BlockError::NbOverwriteDenied)
        ));
    }

    #[test]
    fn different_owner_cannot_seal() {
        let owner = KeyPair::generate();
        let impostor = KeyPair::generate();
        let mut nb = Nb::new(owner.public_key(), "alias".to_string(), b"v0".to_vec());
        assert!(nb.seal_with(&impostor).is_err());
    }
}
