//! # Content encryption and per-reader wrapping
//!
//! ACBs encrypt their payload under a fresh `Secret` each time the ACL
//! changes, then wrap that `Secret` once per reader so each reader can
//! recover it with their own keypair (SPEC_FULL.md §3.2, §4.2).

use crate::session::{SessionKeyPair, SessionPublicKey};
use crate::CryptoError;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// A content-encryption key for one ACB version.
#[derive(Clone)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypt `plaintext` under this secret. The nonce is prepended to the
    /// ciphertext so `open` is self-contained.
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let mut nonce_bytes = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut ciphertext = cipher
            .encrypt(nonce, plaintext)
            .expect("chacha20poly1305 encryption does not fail");
        let mut out = nonce_bytes.to_vec();
        out.append(&mut ciphertext);
        out
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < 12 {
            return Err(CryptoError::UnwrapFailed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(12);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::UnwrapFailed)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A `Secret` wrapped for one reader's X25519 public key, stored as an ACL
/// entry's `encrypted_data_token` (SPEC_FULL.md §3.2).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct WrappedSecret {
    pub ephemeral_public: [u8; 32],
    pub ciphertext: Vec<u8>,
}

/// Wrap `secret` so that only the holder of `reader`'s matching private key
/// can recover it.
pub fn wrap_for(reader: &SessionPublicKey, secret: &Secret) -> WrappedSecret {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    let ephemeral = SessionKeyPair::from_seed(seed);
    let shared = ephemeral.shared_key(reader);
    let wrapper = Secret::from_bytes(shared);
    let ciphertext = wrapper.seal(secret.as_bytes());
    seed.zeroize();
    WrappedSecret {
        ephemeral_public: ephemeral.public().as_bytes().to_owned(),
        ciphertext,
    }
}

/// Recover a `Secret` wrapped with [`wrap_for`] using the reader's keypair.
pub fn unwrap_with(reader: &SessionKeyPair, wrapped: &WrappedSecret) -> Result<Secret, CryptoError> {
    let ephemeral_public = SessionPublicKey::from_bytes(wrapped.ephemeral_public);
    let shared = reader.shared_key(&ephemeral_public);
    let wrapper = Secret::from_bytes(shared);
    let opened = wrapper.open(&wrapped.ciphertext)?;
    let bytes: [u8; 32] = opened
        .try_into()
        .map_err(|_| CryptoError::UnwrapFailed)?;
    Ok(Secret::from_bytes(bytes))
}
