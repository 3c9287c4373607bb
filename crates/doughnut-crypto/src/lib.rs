//! # Cryptographic primitives
//!
//! Signatures, content hashing, and secret-wrapping used by the block model
//! (`doughnut-block`) and the peer transport handshake (`doughnut-dock`).
//! Grounded on `shared-crypto`'s Ed25519 module, generalized with the
//! X25519/ChaCha20-Poly1305 wrapping the ACL block needs that `shared-crypto`
//! never required.

mod errors;
pub mod hashing;
pub mod session;
pub mod signatures;
pub mod symmetric;

pub use errors::CryptoError;
pub use hashing::content_hash;
pub use session::{derive_session_key, SessionKeyPair, SessionPublicKey, SessionSecret};
pub use signatures::{KeyPair, PublicKey, Signature};
pub use symmetric::{unwrap_with, wrap_for, Secret, WrappedSecret};
