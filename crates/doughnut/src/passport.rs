//! A passport: a certificate binding a peer's public key to a named
//! network, signed by that network's authority key (SPEC_FULL.md §4.10,
//! glossary). Distinct from `doughnut-dock`'s handshake "passport" field,
//! which is only a self-signature proving key ownership for a `NodeId` —
//! this one is issued by a third party and is what the facade presents to
//! justify joining a particular overlay.

use doughnut_crypto::{CryptoError, KeyPair, PublicKey, Signature};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passport {
    network: String,
    peer_key: PublicKey,
    authority_key: PublicKey,
    signature: Signature,
}

impl Passport {
    fn signing_payload(network: &str, peer_key: &PublicKey) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(network.as_bytes());
        buf.extend_from_slice(peer_key.as_bytes());
        buf
    }

    /// Issued by whoever holds `authority`'s keys for `network`.
    pub fn issue(authority: &KeyPair, network: &str, peer_key: PublicKey) -> Self {
        let signature = authority.sign(&Self::signing_payload(network, &peer_key));
        Self {
            network: network.to_string(),
            peer_key,
            authority_key: authority.public_key(),
            signature,
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn peer_key(&self) -> PublicKey {
        self.peer_key
    }

    pub fn authority_key(&self) -> PublicKey {
        self.authority_key
    }

    /// Checks the signature against the authority key this passport
    /// carries; callers that only trust a specific authority should also
    /// compare `authority_key()` against their own expectation.
    pub fn verify(&self) -> Result<(), CryptoError> {
        self.authority_key
            .verify(&Self::signing_payload(&self.network, &self.peer_key), &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_freshly_issued_passport_verifies() {
        let authority = KeyPair::generate();
        let peer = KeyPair::generate();
        let passport = Passport::issue(&authority, "example-net", peer.public_key());
        assert!(passport.verify().is_ok());
    }

    #[test]
    fn tampering_with_the_network_name_breaks_verification() {
        let authority = KeyPair::generate();
        let peer = KeyPair::generate();
        let mut passport = Passport::issue(&authority, "example-net", peer.public_key());
        passport.network = "other-net".to_string();
        assert!(passport.verify().is_err());
    }
}
