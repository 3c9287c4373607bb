//! Wire request/response envelopes, one variant per `Peer` method plus a
//! `Ping` for the heartbeat (SPEC_FULL.md §4.4). Mirrors
//! `qc-01-peer-discovery::wire`'s message enum shape: a flat request enum
//! and a flat response enum, each tagged with the request id that
//! correlates them over the multiplexed stream.

use doughnut_block::{Block, ConsensusError, RemoveSignature};
use doughnut_crypto::PublicKey;
use doughnut_keychain::ShortHash;
use doughnut_overlay::{PaxosValue, ProposalId, Promise, StoreMode};
use doughnut_types::Address;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcCall {
    Ping,
    Store { block: Block, mode: StoreMode },
    Fetch { address: Address, local_version: Option<u64> },
    Remove { address: Address, sig: RemoveSignature },
    Propose { address: Address, proposal_id: ProposalId },
    Accept { address: Address, proposal_id: ProposalId, value: PaxosValue },
    /// Keychain miss: ask the peer for the full key behind a short hash it
    /// sent us earlier (spec.md §4.3, §6 `key_hash_lookup`).
    ResolveKey(ShortHash),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcReply {
    Pong,
    Stored,
    Fetched(Option<Block>),
    Removed,
    Proposed(Promise),
    Accepted(bool),
    ResolvedKey(Option<PublicKey>),
    Failed(ConsensusError),
}

/// One frame on the wire: a request id the reader loop uses to route the
/// matching `Envelope<RpcReply>` back to the caller that's awaiting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub request_id: u64,
    pub body: T,
}

/// Either side of one TCP connection can initiate a call (block storage and
/// Paxos messages flow both ways between peers), so every decrypted frame
/// is tagged as a fresh `Call` to answer or a `Reply` to an earlier call of
/// ours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Call(Envelope<RpcCall>),
    Reply(Envelope<RpcReply>),
}
