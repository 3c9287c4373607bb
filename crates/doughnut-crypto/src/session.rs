//! # X25519 key exchange
//!
//! Used both to derive the Dock handshake's session key (SPEC_FULL.md §4.4)
//! and to wrap ACB content-encryption secrets per reader (§4.2).
//! `shared-crypto` has no asymmetric-encryption primitive of its own
//! (Quantum-Chain only ever signs); X25519 + ChaCha20-Poly1305 is the
//! natural choice from the same RustCrypto family it already depends on.

use crate::CryptoError;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};
use zeroize::Zeroize;

/// A 32-byte X25519 public key used as an encryption target. Stored
/// alongside a reader's Ed25519 `PublicKey` wherever they are granted
/// access (SPEC_FULL.md §4.2): the two key spaces are derived from the same
/// seed but one is not recoverable from the other, so a grantor who knows
/// only a reader's Ed25519 identity key must be handed their session key
/// too, the same way peers exchange one during the Dock handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPublicKey([u8; 32]);

impl SessionPublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// An X25519 keypair. Each peer/reader derives one deterministically from
/// their Ed25519 seed so a single identity seed is sufficient to act as
/// both a signer and a decryption target.
pub struct SessionKeyPair {
    secret: StaticSecret,
}

impl SessionKeyPair {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        // Derive an independent X25519 scalar from the Ed25519 seed so the
        // two key spaces never share raw secret material.
        let mut hasher = Sha256::new();
        hasher.update(b"doughnut-session-key-v1");
        hasher.update(seed);
        let derived: [u8; 32] = hasher.finalize().into();
        Self {
            secret: StaticSecret::from(derived),
        }
    }

    pub fn public(&self) -> SessionPublicKey {
        SessionPublicKey(XPublicKey::from(&self.secret).to_bytes())
    }

    /// Diffie-Hellman with a peer's public key, hashed into a symmetric key.
    pub fn shared_key(&self, peer: &SessionPublicKey) -> [u8; 32] {
        let shared = self.secret.diffie_hellman(&XPublicKey::from(peer.0));
        let mut hasher = Sha256::new();
        hasher.update(b"doughnut-shared-key-v1");
        hasher.update(shared.as_bytes());
        hasher.finalize().into()
    }
}

/// An ephemeral secret sealed for a specific recipient during the Dock
/// handshake (SPEC_FULL.md §4.4 "shared symmetric key ... sealed during the
/// handshake").
pub struct SessionSecret {
    pub ephemeral_public: SessionPublicKey,
    pub derived_key: [u8; 32],
}

/// Derive the session key for the rest of an RPC connection. The dialing
/// side generates a fresh ephemeral keypair, performs DH against the
/// listener's long-term session public key, and both sides end up with the
/// same `derived_key` without ever transmitting it directly.
pub fn derive_session_key(listener_public: &SessionPublicKey) -> Result<SessionSecret, CryptoError> {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let ephemeral = SessionKeyPair::from_seed(seed);
    let derived_key = ephemeral.shared_key(listener_public);
    seed.zeroize();
    Ok(SessionSecret {
        ephemeral_public: ephemeral.public(),
        derived_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree_on_shared_key() {
        let listener = SessionKeyPair::from_seed([1u8; 32]);
        let sealed = derive_session_key(&listener.public()).unwrap();
        let listener_side_key = listener.shared_key(&sealed.ephemeral_public);
        assert_eq!(listener_side_key, sealed.derived_key);
    }
}
