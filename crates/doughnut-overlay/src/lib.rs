//! # Overlay
//!
//! The placement contract (`Overlay`), the `Peer` RPC trait, and the Paxos
//! wire vocabulary (`ProposalId`, `PaxosValue`) shared between
//! `doughnut-dock`, `doughnut-local`, and `doughnut-paxos` (SPEC_FULL.md
//! §4.5). Grounded on `qc-01-peer-discovery::ports::outbound`'s
//! contract-trait style, reused at crate-local scale instead of the
//! teacher's cross-subsystem bus since placement topology is explicitly
//! out of scope here.

mod overlay;
mod peer;
mod static_overlay;

pub use overlay::{DiscoveryEvent, Location, Overlay, OverlayError, OverlayStream};
pub use peer::{Consensus, PaxosValue, Peer, ProposalId, Promise, StoreMode};
pub use static_overlay::StaticOverlay;
