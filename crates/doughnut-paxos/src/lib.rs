//! Single-decree-per-address Paxos replication over the `Peer` RPC
//! contract (SPEC_FULL.md §4.7). `PaxosServer` is both a proposer (`store`/
//! `remove` drive a round to agreement before returning) and an acceptor
//! (`propose`/`accept` answer whichever peer is proposing, including
//! itself).

mod config;
mod server;
mod state;

pub use config::PaxosConfig;
pub use server::PaxosServer;
pub use state::{paxos_key, AcceptorState};
