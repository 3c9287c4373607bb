//! # Error Kinds
//!
//! Per-subsystem error enums, following `shared-types::errors::StorageError`'s
//! convention of one `thiserror` enum per subsystem rather than a single
//! monolithic error type.

use crate::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the Silo (SPEC_FULL.md §4.1).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum SiloError {
    #[error("missing key: {0}")]
    MissingKey(Address),

    #[error("collision: key already present: {0}")]
    Collision(Address),

    #[error("insufficient space: {requested} bytes requested, {available} available")]
    InsufficientSpace { requested: u64, available: u64 },

    #[error("io error: {0}")]
    Io(String),
}

/// Errors raised by block validation (SPEC_FULL.md §3.3, §4.2).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum BlockError {
    #[error("address mismatch: computed {computed} does not match stored {stored}")]
    AddressMismatch { computed: Address, stored: Address },

    #[error("version did not increase: old {old}, new {new}")]
    VersionRegression { old: u64, new: u64 },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("editor {0:?} lacks write permission")]
    EditorNotAuthorized(crate::PublicKey),

    #[error("NB overwrite denied: name/owner/payload changed")]
    NbOverwriteDenied,

    #[error("group key sequence would shrink")]
    GroupKeySequenceShrunk,

    #[error("unsupported compatibility version: {0}")]
    UnsupportedVersion(u16),

    #[error("remove signature invalid")]
    InvalidRemoveSignature,
}

/// Errors raised anywhere in the consensus stack (Local / Paxos / Async /
/// Cache / facade) that do not need to carry a `Block` payload.
///
/// `Conflict` and `ValidationFailed`, which carry the losing/current block,
/// are defined in `doughnut-block::ConsensusError` instead, since the block
/// type lives in that crate; this enum covers the remainder of the table in
/// SPEC_FULL.md §7.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ConsensusError {
    #[error("missing block: {0}")]
    MissingBlock(Address),

    #[error("too few reachable peers: need {need}, have {have}")]
    TooFewPeers { need: usize, have: usize },

    #[error("overlay could not resolve node {0}")]
    NodeNotFound(crate::NodeId),

    #[error("silo error: {0}")]
    Silo(#[from] SiloError),

    #[error("transient I/O error: {0}")]
    Transient(String),
}
