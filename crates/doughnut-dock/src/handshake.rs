//! Challenge/response handshake plus session-key derivation
//! (SPEC_FULL.md §4.4), grounded on `qc-01-peer-discovery::domain::
//! handshake`'s state-machine shape (exchange data, verify, accept/reject)
//! with the chain-fork checks replaced by identity proof: `Hello` ->
//! `Challenge` -> `ChallengeResponse` -> session key.

use doughnut_crypto::{
    content_hash, derive_session_key, KeyPair, PublicKey, SessionKeyPair, SessionPublicKey,
    Signature,
};
use doughnut_types::NodeId;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::wire::{read_frame, write_frame};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("node id does not match the claimed public key")]
    NodeIdMismatch,
    #[error("passport signature did not verify")]
    InvalidPassport,
    #[error("challenge response did not verify")]
    ChallengeFailed,
    #[error("io error: {0}")]
    Io(String),
    #[error("malformed handshake message: {0}")]
    Malformed(String),
}

impl From<std::io::Error> for HandshakeError {
    fn from(e: std::io::Error) -> Self {
        HandshakeError::Io(e.to_string())
    }
}

pub fn node_id_for(public_key: &PublicKey) -> NodeId {
    NodeId(content_hash(&[public_key.as_bytes()]))
}

#[derive(Serialize, Deserialize)]
struct Hello {
    node_id: NodeId,
    public_key: PublicKey,
    /// A self-signed statement binding `public_key` to `node_id`.
    passport: Signature,
}

#[derive(Serialize, Deserialize)]
struct Challenge {
    nonce: [u8; 32],
}

#[derive(Serialize, Deserialize)]
struct ChallengeResponse {
    signature: Signature,
}

#[derive(Serialize, Deserialize)]
struct ServerSessionKey {
    session_public: [u8; 32],
}

#[derive(Serialize, Deserialize)]
struct ClientSessionKey {
    ephemeral_public: [u8; 32],
}

async fn send<T: Serialize, W: AsyncWriteExt + Unpin>(w: &mut W, msg: &T) -> Result<(), HandshakeError> {
    let bytes = bincode::serialize(msg).map_err(|e| HandshakeError::Malformed(e.to_string()))?;
    write_frame(w, &bytes).await?;
    Ok(())
}

async fn recv<T: for<'de> Deserialize<'de>, R: AsyncReadExt + Unpin>(r: &mut R) -> Result<T, HandshakeError> {
    let bytes = read_frame(r).await?;
    bincode::deserialize(&bytes).map_err(|e| HandshakeError::Malformed(e.to_string()))
}

/// The symmetric key the rest of the connection seals its frames under.
/// The handshake protocol only challenges the *dialer* (spec.md §4.4: one
/// `Challenge`/`ChallengeResponse`, not a mutual pair), so the dial side
/// never gets cryptographic proof of the listener's identity from this
/// exchange alone — it relies on having dialed a `Location` it already
/// trusts (e.g. one returned by `Overlay::lookup_node`).
pub struct ClientHandshake {
    pub session_key: [u8; 32],
}

/// What the listener learns: the dialer's proven identity plus the shared
/// session key.
pub struct ServerHandshake {
    pub peer_id: NodeId,
    pub session_key: [u8; 32],
}

/// Dial-side handshake: prove our identity, then derive a session key
/// against the listener's long-term session public key.
pub async fn perform_client_handshake<S>(
    stream: &mut S,
    keys: &KeyPair,
) -> Result<ClientHandshake, HandshakeError>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let node_id = node_id_for(&keys.public_key());
    let passport = keys.sign(&node_id.0);
    send(
        stream,
        &Hello {
            node_id,
            public_key: keys.public_key(),
            passport,
        },
    )
    .await?;

    let challenge: Challenge = recv(stream).await?;
    let signature = keys.sign(&challenge.nonce);
    send(stream, &ChallengeResponse { signature }).await?;

    let server_key: ServerSessionKey = recv(stream).await?;
    let sealed = derive_session_key(&SessionPublicKey::from_bytes(server_key.session_public))
        .map_err(|_| HandshakeError::ChallengeFailed)?;
    send(
        stream,
        &ClientSessionKey {
            ephemeral_public: *sealed.ephemeral_public.as_bytes(),
        },
    )
    .await?;

    Ok(ClientHandshake {
        session_key: sealed.derived_key,
    })
}

/// Listen-side handshake: verify the dialer's identity, then hand them a
/// session key they can derive against.
pub async fn perform_server_handshake<S>(
    stream: &mut S,
    keys: &KeyPair,
) -> Result<ServerHandshake, HandshakeError>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let hello: Hello = recv(stream).await?;
    if node_id_for(&hello.public_key) != hello.node_id {
        return Err(HandshakeError::NodeIdMismatch);
    }
    hello
        .public_key
        .verify(&hello.node_id.0, &hello.passport)
        .map_err(|_| HandshakeError::InvalidPassport)?;

    let mut nonce = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    send(stream, &Challenge { nonce }).await?;

    let response: ChallengeResponse = recv(stream).await?;
    hello
        .public_key
        .verify(&nonce, &response.signature)
        .map_err(|_| HandshakeError::ChallengeFailed)?;

    let own_session = SessionKeyPair::from_seed(keys.to_seed());
    send(
        stream,
        &ServerSessionKey {
            session_public: *own_session.public().as_bytes(),
        },
    )
    .await?;

    let client_key: ClientSessionKey = recv(stream).await?;
    let session_key = own_session.shared_key(&SessionPublicKey::from_bytes(client_key.ephemeral_public));

    Ok(ServerHandshake {
        peer_id: hello.node_id,
        session_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn client_and_server_agree_on_session_key_and_identity() {
        let client_keys = KeyPair::generate();
        let server_keys = KeyPair::generate();
        let (mut client_stream, mut server_stream) = duplex(4096);

        let client_keys_id = node_id_for(&client_keys.public_key());

        let (client_result, server_result) = tokio::join!(
            perform_client_handshake(&mut client_stream, &client_keys),
            perform_server_handshake(&mut server_stream, &server_keys),
        );

        let client_result = client_result.unwrap();
        let server_result = server_result.unwrap();
        assert_eq!(server_result.peer_id, client_keys_id);
        assert_eq!(client_result.session_key, server_result.session_key);
    }

    #[tokio::test]
    async fn tampered_node_id_is_rejected() {
        let client_keys = KeyPair::generate();
        let server_keys = KeyPair::generate();
        let (mut client_stream, mut server_stream) = duplex(4096);

        let bad_hello = Hello {
            node_id: NodeId([0xAA; 32]),
            public_key: client_keys.public_key(),
            passport: client_keys.sign(&[0xAA; 32]),
        };
        let bytes = bincode::serialize(&bad_hello).unwrap();
        write_frame(&mut client_stream, &bytes).await.unwrap();

        let result = perform_server_handshake(&mut server_stream, &server_keys).await;
        assert!(matches!(result, Err(HandshakeError::NodeIdMismatch)));
    }
}
