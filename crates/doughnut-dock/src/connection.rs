//! A live, authenticated link to one remote peer: request/response
//! multiplexing over a single `TcpStream`, frame encryption under the
//! handshake's session key, and a lifecycle watched by the reconnect logic
//! in `remote.rs`.
//!
//! Grounded on `qc-16-api-gateway::domain::pending::PendingRequestStore`'s
//! correlation-id-to-oneshot-sender table for bridging an async wait onto
//! a later out-of-band response; here one task owns the socket and demuxes
//! inbound frames to whichever caller is waiting on that request id
//! instead of an event-bus response. Since both
//! ends of a peer connection can originate Paxos/store traffic, every
//! decrypted frame is further tagged (`rpc::Frame`) as either a fresh call
//! to answer against the local peer image or a reply to one of ours.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use doughnut_block::{Block, ConsensusError, RemoveSignature};
use doughnut_crypto::{KeyPair, Secret};
use doughnut_keychain::KeyChain;
use doughnut_overlay::{PaxosValue, Peer, ProposalId, Promise, StoreMode};
use doughnut_types::{Address, NodeId};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::handshake::{perform_client_handshake, perform_server_handshake, HandshakeError};
use crate::rpc::{Envelope, Frame, RpcCall, RpcReply};
use crate::wire::{read_frame, write_frame};

const KEYCHAIN_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcReply>>>>;

/// One multiplexed RPC channel to a remote peer. Implements
/// `doughnut_overlay::Peer` by round-tripping calls over the encrypted
/// frame stream, and answers the remote's calls against whatever local
/// `Peer` the caller wired in (normally a `doughnut-local::LocalPeer`).
pub struct Connection {
    peer_id: NodeId,
    session_key: [u8; 32],
    next_request_id: AtomicU64,
    pending: Pending,
    outbound: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    state: watch::Sender<ConnectionState>,
    keychain: Arc<Mutex<KeyChain>>,
    _reader_task: JoinHandle<()>,
    _writer_task: JoinHandle<()>,
    _heartbeat_task: JoinHandle<()>,
}

impl Connection {
    /// Dial `stream` as the client side: run the handshake, then spawn the
    /// read/write/heartbeat tasks. The caller already knows (or chooses not
    /// to verify) which `NodeId` it intended to reach — this handshake only
    /// proves the dialer's identity to the listener, per spec.md §4.4.
    pub async fn dial(
        mut stream: TcpStream,
        keys: &KeyPair,
        expected: Option<NodeId>,
        local: Arc<dyn Peer>,
    ) -> Result<Arc<Self>, HandshakeError> {
        let handshaken = perform_client_handshake(&mut stream, keys).await?;
        let peer_id = expected.unwrap_or(NodeId([0u8; 32]));
        Ok(Self::spawn(stream, peer_id, handshaken.session_key, local))
    }

    /// Accept `stream` as the server side: run the handshake, learning the
    /// dialer's proven identity, then spawn the read/write/heartbeat tasks.
    pub async fn accept(
        mut stream: TcpStream,
        keys: &KeyPair,
        local: Arc<dyn Peer>,
    ) -> Result<Arc<Self>, HandshakeError> {
        let handshaken = perform_server_handshake(&mut stream, keys).await?;
        Ok(Self::spawn(stream, handshaken.peer_id, handshaken.session_key, local))
    }

    fn spawn(stream: TcpStream, peer_id: NodeId, session_key: [u8; 32], local: Arc<dyn Peer>) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let keychain = Arc::new(Mutex::new(KeyChain::new(KEYCHAIN_CAPACITY)));
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Connected);
        let (outbound_tx, outbound_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();

        let reader_task = tokio::spawn(read_loop(
            read_half,
            session_key,
            pending.clone(),
            outbound_tx.clone(),
            local,
            state_tx.clone(),
            keychain.clone(),
        ));
        let writer_task = tokio::spawn(write_loop(write_half, outbound_rx, state_tx.clone()));
        let heartbeat_task = tokio::spawn(heartbeat_loop(outbound_tx.clone(), session_key, state_tx.subscribe()));

        Arc::new(Self {
            peer_id,
            session_key,
            next_request_id: AtomicU64::new(1),
            pending,
            outbound: outbound_tx,
            state: state_tx,
            keychain,
            _reader_task: reader_task,
            _writer_task: writer_task,
            _heartbeat_task: heartbeat_task,
        })
    }

    pub fn peer_id(&self) -> NodeId {
        self.peer_id
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    async fn call(&self, body: RpcCall) -> Result<RpcReply, ConsensusError> {
        if !self.is_connected() {
            return Err(ConsensusError::Transient("connection is not live".into()));
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);

        let frame = Frame::Call(Envelope { request_id, body });
        if self.send_frame(&frame).is_err() {
            self.pending.lock().remove(&request_id);
            return Err(ConsensusError::Transient("connection writer has shut down".into()));
        }

        match rx.await {
            Ok(reply) => Ok(reply),
            Err(_) => Err(ConsensusError::Transient("connection closed before reply arrived".into())),
        }
    }

    fn send_frame(&self, frame: &Frame) -> Result<(), ConsensusError> {
        let plaintext = bincode::serialize(frame).map_err(|e| ConsensusError::Transient(e.to_string()))?;
        let sealed = Secret::from_bytes(self.session_key).seal(&plaintext);
        self.outbound
            .send(sealed)
            .map_err(|_| ConsensusError::Transient("connection writer has shut down".into()))
    }

    /// Recover the full key behind a short hash this connection's peer sent
    /// us, asking the peer directly on a cache miss (spec.md §4.3).
    pub async fn resolve_key(&self, short: doughnut_keychain::ShortHash) -> Option<doughnut_crypto::PublicKey> {
        if let Some(key) = self.keychain.lock().get(&short) {
            return Some(key);
        }
        let reply = self.call(RpcCall::ResolveKey(short)).await.ok()?;
        match reply {
            RpcReply::ResolvedKey(Some(key)) => {
                self.keychain.lock().insert(key);
                Some(key)
            }
            _ => None,
        }
    }
}

async fn read_loop(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    session_key: [u8; 32],
    pending: Pending,
    outbound: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    local: Arc<dyn Peer>,
    state: watch::Sender<ConnectionState>,
    keychain: Arc<Mutex<KeyChain>>,
) {
    let secret = Secret::from_bytes(session_key);
    loop {
        let sealed = match read_frame(&mut reader).await {
            Ok(bytes) => bytes,
            Err(_) => break,
        };
        let plaintext = match secret.open(&sealed) {
            Ok(bytes) => bytes,
            Err(_) => break,
        };
        let frame: Frame = match bincode::deserialize(&plaintext) {
            Ok(f) => f,
            Err(_) => break,
        };
        match frame {
            Frame::Reply(envelope) => {
                if let Some(sender) = pending.lock().remove(&envelope.request_id) {
                    let _ = sender.send(envelope.body);
                }
            }
            Frame::Call(envelope) => {
                let local = local.clone();
                let outbound = outbound.clone();
                let secret = Secret::from_bytes(session_key);
                let keychain = keychain.clone();
                tokio::spawn(async move {
                    let request_id = envelope.request_id;
                    let body = answer(&*local, &keychain, envelope.body).await;
                    let frame = Frame::Reply(Envelope { request_id, body });
                    if let Ok(plaintext) = bincode::serialize(&frame) {
                        let _ = outbound.send(secret.seal(&plaintext));
                    }
                });
            }
        }
    }
    let _ = state.send(ConnectionState::Disconnected);
}

/// Dispatch one inbound `RpcCall` against the local peer image.
///
/// `keychain` doubles as this connection's registry of full keys it has
/// seen proof of and can therefore answer `ResolveKey` for: every block a
/// peer successfully stores or removes through us carries an owner/signer
/// key that peer already knows in full, so a short hash it later sends us
/// for that same key resolves out of this table instead of a no-op
/// (spec.md §4.3).
async fn answer(local: &dyn Peer, keychain: &Mutex<KeyChain>, call: RpcCall) -> RpcReply {
    match call {
        RpcCall::Ping => RpcReply::Pong,
        RpcCall::ResolveKey(short) => RpcReply::ResolvedKey(keychain.lock().get(&short)),
        RpcCall::Store { block, mode } => {
            let owner_key = block.owner_key();
            match local.store(block, mode).await {
                Ok(()) => {
                    if let Some(key) = owner_key {
                        keychain.lock().insert(key);
                    }
                    RpcReply::Stored
                }
                Err(e) => RpcReply::Failed(e),
            }
        }
        RpcCall::Fetch { address, local_version } => match local.fetch(address, local_version).await {
            Ok(block) => RpcReply::Fetched(block),
            Err(e) => RpcReply::Failed(e),
        },
        RpcCall::Remove { address, sig } => {
            let signer = sig.signer;
            match local.remove(address, sig).await {
                Ok(()) => {
                    if let Some(key) = signer {
                        keychain.lock().insert(key);
                    }
                    RpcReply::Removed
                }
                Err(e) => RpcReply::Failed(e),
            }
        }
        RpcCall::Propose { address, proposal_id } => match local.propose(address, proposal_id).await {
            Ok(promise) => RpcReply::Proposed(promise),
            Err(e) => RpcReply::Failed(e),
        },
        RpcCall::Accept { address, proposal_id, value } => {
            match local.accept(address, proposal_id, value).await {
                Ok(ok) => RpcReply::Accepted(ok),
                Err(e) => RpcReply::Failed(e),
            }
        }
    }
}

async fn write_loop(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut outbound: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
    state: watch::Sender<ConnectionState>,
) {
    while let Some(sealed) = outbound.recv().await {
        if write_frame(&mut writer, &sealed).await.is_err() {
            break;
        }
    }
    let _ = state.send(ConnectionState::Disconnected);
}

/// Sends an encrypted no-op `Ping` periodically so a half-open socket (the
/// remote crashed without closing cleanly) is detected instead of hanging
/// forever.
async fn heartbeat_loop(
    outbound: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    session_key: [u8; 32],
    mut state: watch::Receiver<ConnectionState>,
) {
    let secret = Secret::from_bytes(session_key);
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if *state.borrow() != ConnectionState::Connected {
                    break;
                }
                let frame = Frame::Call(Envelope { request_id: 0, body: RpcCall::Ping });
                if let Ok(bytes) = bincode::serialize(&frame) {
                    if outbound.send(secret.seal(&bytes)).is_err() {
                        break;
                    }
                }
            }
            _ = state.changed() => {
                if *state.borrow() != ConnectionState::Connected {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Peer for Connection {
    async fn store(&self, block: Block, mode: StoreMode) -> Result<(), ConsensusError> {
        match self.call(RpcCall::Store { block, mode }).await? {
            RpcReply::Stored => Ok(()),
            RpcReply::Failed(e) => Err(e),
            _ => Err(ConsensusError::Transient("unexpected reply to store".into())),
        }
    }

    async fn fetch(&self, address: Address, local_version: Option<u64>) -> Result<Option<Block>, ConsensusError> {
        match self.call(RpcCall::Fetch { address, local_version }).await? {
            RpcReply::Fetched(block) => Ok(block),
            RpcReply::Failed(e) => Err(e),
            _ => Err(ConsensusError::Transient("unexpected reply to fetch".into())),
        }
    }

    async fn remove(&self, address: Address, sig: RemoveSignature) -> Result<(), ConsensusError> {
        match self.call(RpcCall::Remove { address, sig }).await? {
            RpcReply::Removed => Ok(()),
            RpcReply::Failed(e) => Err(e),
            _ => Err(ConsensusError::Transient("unexpected reply to remove".into())),
        }
    }

    async fn propose(&self, address: Address, proposal_id: ProposalId) -> Result<Promise, ConsensusError> {
        match self.call(RpcCall::Propose { address, proposal_id }).await? {
            RpcReply::Proposed(promise) => Ok(promise),
            RpcReply::Failed(e) => Err(e),
            _ => Err(ConsensusError::Transient("unexpected reply to propose".into())),
        }
    }

    async fn accept(&self, address: Address, proposal_id: ProposalId, value: PaxosValue) -> Result<bool, ConsensusError> {
        match self.call(RpcCall::Accept { address, proposal_id, value }).await? {
            RpcReply::Accepted(ok) => Ok(ok),
            RpcReply::Failed(e) => Err(e),
            _ => Err(ConsensusError::Transient("unexpected reply to accept".into())),
        }
    }
}
