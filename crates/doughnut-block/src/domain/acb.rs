//! ACL block (ACB): mutable, extends OKB with per-user/per-group ACLs and
//! payload encryption (SPEC_FULL.md §3.2, §4.2).

use doughnut_crypto::{content_hash, wrap_for, KeyPair, PublicKey, Secret, SessionKeyPair, SessionPublicKey, Signature, WrappedSecret};
use doughnut_types::{Address, AddressFlags, BlockError};
use serde::{Deserialize, Serialize};

use crate::domain::block::RemoveSignature;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AclEntry {
    pub user_key: PublicKey,
    /// The reader's X25519 public key, supplied by whoever grants the entry
    /// (it cannot be derived from `user_key` — see `SessionPublicKey`'s
    /// doc comment).
    pub session_key: SessionPublicKey,
    pub read: bool,
    pub write: bool,
    pub encrypted_data_token: Option<WrappedSecret>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupEntry {
    /// The group's current public signing key (rotates as members leave;
    /// see `Gb::current_key`).
    pub group_key: PublicKey,
    /// The group's current X25519 key, supplied alongside `group_key` by
    /// whoever grants the entry.
    pub session_key: SessionPublicKey,
    pub read: bool,
    pub write: bool,
    pub encrypted_data_token: Option<WrappedSecret>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Acb {
    address: Address,
    owner_key: PublicKey,
    /// The owner's X25519 key, fixed at creation: the owner is the one
    /// party guaranteed to know their own session key up front.
    owner_session_key: SessionPublicKey,
    salt: [u8; 16],
    version: u64,
    ciphertext: Vec<u8>,
    acl: Vec<AclEntry>,
    groups: Vec<GroupEntry>,
    world_readable: bool,
    world_writable: bool,
    editor: PublicKey,
    data_signature: Option<Signature>,
    admins: Vec<(PublicKey, SessionPublicKey)>,
    owner_token: Option<WrappedSecret>,
    #[serde(skip)]
    acl_dirty: bool,
    compat_version: u16,
}

impl Acb {
    pub fn compute_address(owner_key: &PublicKey, salt: &[u8; 16]) -> Address {
        let hash = content_hash(&[owner_key.as_bytes(), salt]);
        Address::new(hash, AddressFlags::Mutable)
    }

    pub fn new(owner_key: PublicKey, owner_session_key: SessionPublicKey, salt: [u8; 16]) -> Self {
        let address = Self::compute_address(&owner_key, &salt);
        Self {
            address,
            owner_key,
            owner_session_key,
            salt,
            version: 0,
            ciphertext: Vec::new(),
            acl: Vec::new(),
            groups: Vec::new(),
            world_readable: false,
            world_writable: false,
            editor: owner_key,
            data_signature: None,
            admins: vec![(owner_key, owner_session_key)],
            owner_token: None,
            acl_dirty: true,
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

    pub fn editor(&self) -> &PublicKey {
        &self.editor
    }

    /// The encrypted payload as stored; callers need a reader's keypair and
    /// [`Acb::decrypt_with`] to recover the plaintext.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn world_writable(&self) -> bool {
        self.world_writable
    }

    pub fn set_world_flags(&mut self, readable: bool, writable: bool) {
        self.world_readable = readable;
        self.world_writable = writable;
        self.acl_dirty = true;
    }

    /// Grant or update read/write access for `user_key`. `session_key` is
    /// the reader's own X25519 public key, supplied by the caller — it
    /// cannot be derived from `user_key` (see [`SessionPublicKey`]'s doc
    /// comment), so the grantor must already know or have looked it up.
    pub fn set_acl_entry(&mut self, user_key: PublicKey, session_key: SessionPublicKey, read: bool, write: bool) {
        if let Some(existing) = self.acl.iter_mut().find(|e| e.user_key == user_key) {
            existing.session_key = session_key;
            existing.read = read;
            existing.write = write;
        } else {
            self.acl.push(AclEntry {
                user_key,
                session_key,
                read,
                write,
                encrypted_data_token: None,
            });
        }
        self.acl_dirty = true;
    }

    pub fn remove_acl_entry(&mut self, user_key: &PublicKey) {
        self.acl.retain(|e| &e.user_key != user_key);
        self.acl_dirty = true;
    }

    pub fn set_group_entry(&mut self, group_key: PublicKey, session_key: SessionPublicKey, read: bool, write: bool) {
        if let Some(existing) = self.groups.iter_mut().find(|e| e.group_key == group_key) {
            existing.session_key = session_key;
            existing.read = read;
            existing.write = write;
        } else {
            self.groups.push(GroupEntry {
                group_key,
                session_key,
                read,
                write,
                encrypted_data_token: None,
            });
        }
        self.acl_dirty = true;
    }

    pub fn acl(&self) -> &[AclEntry] {
        &self.acl
    }

    pub fn admins(&self) -> &[(PublicKey, SessionPublicKey)] {
        &self.admins
    }

    pub fn set_admins(&mut self, admins: Vec<(PublicKey, SessionPublicKey)>) {
        self.admins = admins;
    }

    fn is_writer(&self, key: &PublicKey) -> bool {
        key == &self.owner_key
            || self.world_writable
            || self.acl.iter().any(|e| &e.user_key == key && e.write)
            || self.groups.iter().any(|e| &e.group_key == key && e.write)
    }

    fn acl_hash(&self) -> [u8; 32] {
        let mut buf = Vec::new();
        for e in &self.acl {
            buf.extend_from_slice(e.user_key.as_bytes());
            buf.push(e.read as u8);
            buf.push(e.write as u8);
        }
        for e in &self.groups {
            buf.extend_from_slice(e.group_key.as_bytes());
            buf.push(e.read as u8);
            buf.push(e.write as u8);
        }
        buf.push(self.world_readable as u8);
        buf.push(self.world_writable as u8);
        content_hash(&[&buf])
    }

    fn data_signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&content_hash(&[&self.ciphertext]));
        buf.extend_from_slice(&self.acl_hash());
        buf
    }

    /// Reseal the ACB: re-wrap the content key if the ACL changed, bump the
    /// version, and have `editor` sign the result. `editor` need not be the
    /// owner, but must currently have write access (SPEC_FULL.md §4.2).
    pub fn seal_with(
        &mut self,
        editor: &KeyPair,
        plaintext: Option<&[u8]>,
        bump_version: bool,
    ) -> Result<(), BlockError> {
        if !self.is_writer(&editor.public_key()) {
            return Err(BlockError::EditorNotAuthorized(
                *editor.public_key().as_bytes(),
            ));
        }
        if let Some(plaintext) = plaintext {
            let secret = Secret::generate();
            self.ciphertext = secret.seal(plaintext);
            self.rewrap_tokens(&secret);
            self.acl_dirty = false;
        } else if self.acl_dirty {
            // ACL changed but payload didn't: need the old secret to
            // re-encrypt under a fresh key. Since the fresh key is
            // independent of plaintext, generate one and re-seal the
            // existing ciphertext's plaintext via the caller-supplied
            // secret is not available here, so require callers that
            // change the ACL without new data to pass `plaintext` too.
            return Err(BlockError::InvalidSignature);
        }
        if bump_version {
            self.version += 1;
        }
        self.editor = editor.public_key();
        self.data_signature = Some(editor.sign(&self.data_signing_payload()));
        Ok(())
    }

    fn rewrap_tokens(&mut self, secret: &Secret) {
        self.owner_token = Some(wrap_for(&self.owner_session_key, secret));
        for entry in self.acl.iter_mut().filter(|e| e.read) {
            entry.encrypted_data_token = Some(wrap_for(&entry.session_key, secret));
        }
        for entry in self.groups.iter_mut().filter(|e| e.read) {
            entry.encrypted_data_token = Some(wrap_for(&entry.session_key, secret));
        }
    }

    /// Decrypt the payload using `reader`'s keypair, looking up their
    /// wrapped token in the owner slot, the ACL, or the group list.
    pub fn decrypt_with(&self, reader_seed: [u8; 32]) -> Result<Vec<u8>, BlockError> {
        let reader = SessionKeyPair::from_seed(reader_seed);
        let reader_pub = reader.public();
        let token = if reader_pub == self.owner_session_key {
            self.owner_token.as_ref()
        } else {
            self.acl
                .iter()
                .find(|e| e.session_key == reader_pub)
                .and_then(|e| e.encrypted_data_token.as_ref())
                .or_else(|| {
                    self.groups
                        .iter()
                        .find(|e| e.session_key == reader_pub)
                        .and_then(|e| e.encrypted_data_token.as_ref())
                })
        }
        .ok_or_else(|| {
            BlockError::EditorNotAuthorized(*KeyPair::from_seed(reader_seed).public_key().as_bytes())
        })?;
        let secret = doughnut_crypto::unwrap_with(&reader, token)
            .map_err(|_| BlockError::InvalidSignature)?;
        secret.open(&self.ciphertext).map_err(|_| BlockError::InvalidSignature)
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
        // Invariant 3: editor must be authorized.
        if !self.is_writer(&self.editor) {
            return Err(BlockError::EditorNotAuthorized(*self.editor.as_bytes()));
        }
        let sig = self
            .data_signature
            .as_ref()
            .ok_or(BlockError::InvalidSignature)?;
        self.editor
            .verify(&self.data_signing_payload(), sig)
            .map_err(|_| BlockError::InvalidSignature)
    }

    /// Invariant 2 + 3 (SPEC §3.3): old editor must have had permission,
    /// new version must be exactly old + 1, and admin-set changes require
    /// the owner.
    pub fn validate_replacement(&self, new: &Acb) -> Result<(), BlockError> {
        new.validate()?;
        if new.owner_key != self.owner_key {
            return Err(BlockError::InvalidSignature);
        }
        if !self.is_writer(&self.editor) {
            return Err(BlockError::EditorNotAuthorized(*self.editor.as_bytes()));
        }
        if new.version != self.version + 1 {
            return Err(BlockError::VersionRegression {
                old: self.version,
                new: new.version,
            });
        }
        if new.admins != self.admins && new.editor != self.owner_key {
            return Err(BlockError::EditorNotAuthorized(*new.editor.as_bytes()));
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

    fn session_key_of(kp: &KeyPair) -> SessionPublicKey {
        SessionKeyPair::from_seed(kp.to_seed()).public()
    }

    #[test]
    fn owner_can_seal_and_decrypt() {
        let owner = KeyPair::generate();
        let mut acb = Acb::new(owner.public_key(), session_key_of(&owner), [2u8; 16]);
        acb.seal_with(&owner, Some(b"secret data"), true).unwrap();
        assert!(acb.validate().is_ok());
        let plain = acb.decrypt_with(owner.to_seed()).unwrap();
        assert_eq!(plain, b"secret data");
    }

    #[test]
    fn reader_without_acl_entry_cannot_decrypt() {
        let owner = KeyPair::generate();
        let stranger = KeyPair::generate();
        let mut acb = Acb::new(owner.public_key(), session_key_of(&owner), [2u8; 16]);
        acb.seal_with(&owner, Some(b"secret data"), true).unwrap();
        assert!(acb.decrypt_with(stranger.to_seed()).is_err());
    }

    #[test]
    fn granting_read_lets_user_decrypt() {
        let owner = KeyPair::generate();
        let reader = KeyPair::generate();
        let mut acb = Acb::new(owner.public_key(), session_key_of(&owner), [2u8; 16]);
        acb.set_acl_entry(reader.public_key(), session_key_of(&reader), true, true);
        acb.seal_with(&owner, Some(b"secret data"), true).unwrap();
        let plain = acb.decrypt_with(reader.to_seed()).unwrap();
        assert_eq!(plain, b"secret data");
    }

    #[test]
    fn editor_must_have_write_permission() {
        let owner = KeyPair::generate();
        let stranger = KeyPair::generate();
        let mut acb = Acb::new(owner.public_key(), session_key_of(&owner), [2u8; 16]);
        acb.seal_with(&owner, Some(b"v0"), true).unwrap();
        assert!(acb.seal_with(&stranger, Some(b"v1"), true).is_err());
    }

    #[test]
    fn revoking_read_blocks_future_decryption() {
        let owner = KeyPair::generate();
        let reader = KeyPair::generate();
        let mut acb = Acb::new(owner.public_key(), session_key_of(&owner), [2u8; 16]);
        acb.set_acl_entry(reader.public_key(), session_key_of(&reader), true, false);
        acb.seal_with(&owner, Some(b"v0"), true).unwrap();
        assert!(acb.decrypt_with(reader.to_seed()).is_ok());

        acb.remove_acl_entry(&reader.public_key());
        acb.seal_with(&owner, Some(b"v1"), true).unwrap();
        assert!(acb.decrypt_with(reader.to_seed()).is_err());
    }
}
