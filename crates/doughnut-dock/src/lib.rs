//! # Peer transport
//!
//! TCP-backed implementation of `doughnut_overlay::Peer`: a challenge/
//! response handshake, a multiplexed encrypted RPC channel per connection,
//! and a connection cache with transparent redial. SPEC_FULL.md §4.4.
//!
//! Grounded on `qc-01-peer-discovery`'s net layer, generalized from DHT
//! gossip messages to the five `Peer` RPC methods this store needs.

pub mod connection;
pub mod dock;
pub mod handshake;
pub mod remote;
pub mod rpc;
pub mod wire;

pub use connection::{Connection, ConnectionState};
pub use dock::Dock;
pub use handshake::{node_id_for, ClientHandshake, HandshakeError, ServerHandshake};
