//! Group block (GB): an ACB whose ACL entries name group *members*, with a
//! rotating group signing key that members use to act on the group's behalf
//! (SPEC_FULL.md §3.2). Removing a member rotates the key and re-seals it
//! for the remaining admins, so the removed member cannot forge future
//! group-signed ACL entries in other blocks.

use doughnut_crypto::{wrap_for, KeyPair, PublicKey, Secret, SessionKeyPair, SessionPublicKey, WrappedSecret};
use doughnut_types::BlockError;
use serde::{Deserialize, Serialize};

use crate::domain::acb::Acb;
use crate::domain::block::RemoveSignature;

/// One generation of the group's signing key, sealed for each admin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupKeyPair {
    pub public_key: PublicKey,
    pub sealed_for_admins: Vec<(PublicKey, WrappedSecret)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Gb {
    base: Acb,
    key_history: Vec<GroupKeyPair>,
}

impl Gb {
    pub fn new(owner_key: PublicKey, owner_session_key: SessionPublicKey, salt: [u8; 16]) -> Self {
        Self {
            base: Acb::new(owner_key, owner_session_key, salt),
            key_history: Vec::new(),
        }
    }

    pub fn address(&self) -> doughnut_types::Address {
        self.base.address()
    }

    pub fn base(&self) -> &Acb {
        &self.base
    }

    pub fn current_key(&self) -> Option<&PublicKey> {
        self.key_history.last().map(|g| &g.public_key)
    }

    pub fn key_history(&self) -> &[GroupKeyPair] {
        &self.key_history
    }

    fn seal_group_key_for_admins(&self, group_seed: [u8; 32]) -> Vec<(PublicKey, WrappedSecret)> {
        let secret = Secret::from_bytes(group_seed);
        self.base
            .admins()
            .iter()
            .map(|(admin, admin_session)| (*admin, wrap_for(admin_session, &secret)))
            .collect()
    }

    /// Initialize the group with its first key generation, granting every
    /// `initial_members` read+write access to the group's ACL. Each member
    /// is given as `(identity key, session key)`: the session key cannot be
    /// derived from the identity key, so the caller must already know or
    /// have looked it up (see [`doughnut_crypto::SessionPublicKey`]).
    pub fn initialize(
        &mut self,
        owner: &KeyPair,
        initial_members: &[(PublicKey, SessionPublicKey)],
    ) -> Result<(), BlockError> {
        let group_keypair = KeyPair::generate();
        let sealed = self.seal_group_key_for_admins(group_keypair.to_seed());
        self.key_history.push(GroupKeyPair {
            public_key: group_keypair.public_key(),
            sealed_for_admins: sealed,
        });
        for (member, session) in initial_members {
            self.base.set_acl_entry(*member, *session, true, true);
        }
        self.base.seal_with(owner, Some(&[]), true)
    }

    /// Remove `member`: drop their ACL entry and rotate the group's signing
    /// key so a copy of the old group key can no longer be used to forge
    /// group-signed writes elsewhere (SPEC_FULL.md §3.2).
    pub fn remove_member(
        &mut self,
        admin: &KeyPair,
        member: &PublicKey,
    ) -> Result<(), BlockError> {
        if !self.base.admins().iter().any(|(key, _)| *key == admin.public_key()) {
            return Err(BlockError::EditorNotAuthorized(*admin.public_key().as_bytes()));
        }
        self.base.remove_acl_entry(member);

        let group_keypair = KeyPair::generate();
        let sealed = self.seal_group_key_for_admins(group_keypair.to_seed());
        self.key_history.push(GroupKeyPair {
            public_key: group_keypair.public_key(),
            sealed_for_admins: sealed,
        });

        self.base.seal_with(admin, Some(&[]), true)
    }

    /// Recover the group's current signing key, for an admin who wants to
    /// act on the group's behalf (e.g. to sign a `GroupEntry` elsewhere).
    pub fn recover_current_key(&self, admin_seed: [u8; 32]) -> Result<KeyPair, BlockError> {
        let generation = self.key_history.last().ok_or(BlockError::InvalidSignature)?;
        let admin = KeyPair::from_seed(admin_seed);
        let wrapped = generation
            .sealed_for_admins
            .iter()
            .find(|(id, _)| *id == admin.public_key())
            .map(|(_, w)| w)
            .ok_or(BlockError::EditorNotAuthorized(*admin.public_key().as_bytes()))?;
        let admin_session = SessionKeyPair::from_seed(admin_seed);
        let secret = doughnut_crypto::unwrap_with(&admin_session, wrapped)
            .map_err(|_| BlockError::InvalidSignature)?;
        Ok(KeyPair::from_seed(*secret.as_bytes()))
    }

    pub fn validate(&self) -> Result<(), BlockError> {
        self.base.validate()?;
        if self.key_history.is_empty() {
            return Err(BlockError::InvalidSignature);
        }
        Ok(())
    }

    /// Invariant: the key history is append-only, so a replacement can only
    /// extend it, never rewrite or truncate past generations.
    pub fn validate_replacement(&self, new: &Gb) -> Result<(), BlockError> {
        if new.key_history.len() < self.key_history.len() {
            return Err(BlockError::GroupKeySequenceShrunk);
        }
        for (old_gen, new_gen) in self.key_history.iter().zip(new.key_history.iter()) {
            if old_gen.public_key != new_gen.public_key {
                return Err(BlockError::GroupKeySequenceShrunk);
            }
        }
        self.base.validate_replacement(&new.base)
    }

    pub fn sign_remove(&self, owner: &KeyPair) -> RemoveSignature {
        self.base.sign_remove(owner)
    }

    pub fn validate_remove(&self, sig: &RemoveSignature) -> Result<(), BlockError> {
        self.base.validate_remove(sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_key_of(kp: &KeyPair) -> SessionPublicKey {
        SessionKeyPair::from_seed(kp.to_seed()).public()
    }

    #[test]
    fn initialize_grants_member_access() {
        let owner = KeyPair::generate();
        let member = KeyPair::generate();
        let mut gb = Gb::new(owner.public_key(), session_key_of(&owner), [7u8; 16]);
        gb.initialize(&owner, &[(member.public_key(), session_key_of(&member))]).unwrap();
        assert!(gb.validate().is_ok());
        assert_eq!(gb.key_history().len(), 1);
    }

    #[test]
    fn removing_member_rotates_key_and_keeps_history() {
        let owner = KeyPair::generate();
        let member = KeyPair::generate();
        let mut gb = Gb::new(owner.public_key(), session_key_of(&owner), [7u8; 16]);
        gb.initialize(&owner, &[(member.public_key(), session_key_of(&member))]).unwrap();
        let first_key = *gb.current_key().unwrap();

        gb.remove_member(&owner, &member.public_key()).unwrap();
        let second_key = *gb.current_key().unwrap();

        assert_ne!(first_key, second_key);
        assert_eq!(gb.key_history().len(), 2);
    }

    #[test]
    fn non_admin_cannot_remove_member() {
        let owner = KeyPair::generate();
        let member = KeyPair::generate();
        let stranger = KeyPair::generate();
        let mut gb = Gb::new(owner.public_key(), session_key_of(&owner), [7u8; 16]);
        gb.initialize(&owner, &[(member.public_key(), session_key_of(&member))]).unwrap();
        assert!(gb.remove_member(&stranger, &member.public_key()).is_err());
    }

    #[test]
    fn admin_can_recover_current_group_key() {
        let owner = KeyPair::generate();
        let mut gb = Gb::new(owner.public_key(), session_key_of(&owner), [7u8; 16]);
        gb.initialize(&owner, &[]).unwrap();
        let recovered = gb.recover_current_key(owner.to_seed()).unwrap();
        assert_eq!(&recovered.public_key(), gb.current_key().unwrap());
    }

    #[test]
    fn truncated_key_history_is_rejected() {
        let owner = KeyPair::generate();
        let member = KeyPair::generate();
        let mut gb = Gb::new(owner.public_key(), session_key_of(&owner), [7u8; 16]);
        gb.initialize(&owner, &[(member.public_key(), session_key_of(&member))]).unwrap();

        let mut rolled_back = gb.clone();
        rolled_back.key_history.clear();
        assert!(gb.validate_replacement(&rolled_back).is_err());
    }
}
