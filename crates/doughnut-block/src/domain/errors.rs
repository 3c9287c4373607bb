//! Validation context and the consensus-facing error type.

use crate::domain::block::Block;
use doughnut_types::{Address, BlockError, ConsensusError as BaseConsensusError, NodeId, SiloError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ambient context a block needs to validate itself: mainly the current
/// time, so version-bump signatures and TTL-style checks elsewhere in the
/// stack have a single source of truth. Grounded on `qc-02-block-storage`'s
/// `TimeSource` outbound port (`ports::outbound`).
pub trait Model: Send + Sync {
    fn now(&self) -> doughnut_types::Timestamp;
}

/// A `Model` that returns a fixed time, for tests.
pub struct FixedModel(pub doughnut_types::Timestamp);

impl Model for FixedModel {
    fn now(&self) -> doughnut_types::Timestamp {
        self.0
    }
}

/// The error currency for every layer above the block model (Local, Paxos,
/// Async, Cache, facade) — SPEC_FULL.md §7.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ConsensusError {
    #[error("missing block: {0}")]
    MissingBlock(Address),

    #[error("conflict at {address}: a concurrent write won")]
    Conflict { address: Address, current: Box<Block> },

    #[error("validation failed: {0}")]
    ValidationFailed(#[from] BlockError),

    #[error("too few reachable peers: need {need}, have {have}")]
    TooFewPeers { need: usize, have: usize },

    #[error("overlay could not resolve node {0}")]
    NodeNotFound(NodeId),

    #[error("silo error: {0}")]
    Silo(#[from] SiloError),

    #[error("transient I/O error: {0}")]
    Transient(String),
}

impl From<BaseConsensusError> for ConsensusError {
    fn from(e: BaseConsensusError) -> Self {
        match e {
            BaseConsensusError::MissingBlock(a) => ConsensusError::MissingBlock(a),
            BaseConsensusError::TooFewPeers { need, have } => {
                ConsensusError::TooFewPeers { need, have }
            }
            BaseConsensusError::NodeNotFound(n) => ConsensusError::NodeNotFound(n),
            BaseConsensusError::Silo(s) => ConsensusError::Silo(s),
            BaseConsensusError::Transient(s) => ConsensusError::Transient(s),
        }
    }
}
