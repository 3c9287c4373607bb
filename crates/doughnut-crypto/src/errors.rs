use thiserror::Error;

/// Errors raised by signing, verification, and secret wrapping.
#[derive(Debug, Clone, Error)]
pub enum CryptoError {
    #[error("invalid public key bytes")]
    InvalidPublicKey,

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("secret unwrap failed: wrong key or corrupted token")]
    UnwrapFailed,
}
