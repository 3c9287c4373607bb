//! `User`: the identity a transport buffer names, either a full public key
//! or a truncated key-hash resolvable through a `KeyChain` (SPEC_FULL.md
//! §4.10 `make_user`, glossary "short-key-hash").

use doughnut_crypto::PublicKey;
use doughnut_keychain::{KeyChain, ShortHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum User {
    Key(PublicKey),
    Short(ShortHash),
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum MakeUserError {
    #[error("user buffer must be 8 (short hash) or 32 (public key) bytes, got {0}")]
    WrongLength(usize),
    #[error("buffer did not decode to a valid public key")]
    InvalidKey,
}

/// Decodes a wire buffer into a `User`: a 32-byte buffer is a full public
/// key, an 8-byte buffer is a short-key-hash. Any other length is rejected.
pub fn make_user(data: &[u8]) -> Result<User, MakeUserError> {
    match data.len() {
        32 => {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(data);
            let key = PublicKey::from_bytes(bytes).map_err(|_| MakeUserError::InvalidKey)?;
            Ok(User::Key(key))
        }
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(data);
            Ok(User::Short(ShortHash(bytes)))
        }
        other => Err(MakeUserError::WrongLength(other)),
    }
}

impl User {
    /// Resolves a `Short` user against `chain`, returning the key
    /// unchanged if it was already a `Key`.
    pub fn resolve(&self, chain: &mut KeyChain) -> Option<PublicKey> {
        match self {
            User::Key(key) => Some(*key),
            User::Short(short) => chain.get(short),
        }
    }
}
