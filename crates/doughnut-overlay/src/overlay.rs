//! The placement contract: "where does this address live?"
//! (SPEC_FULL.md §4.5). Concrete topology/placement algorithms are
//! explicitly out of scope; this crate ships only the trait and a fixed-
//! table test double.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use doughnut_types::{Address, NodeId};
use futures::Stream;
use thiserror::Error;

use crate::peer::Peer;

/// Where a peer can be dialed: an optional known identity plus candidate
/// network endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub id: Option<NodeId>,
    pub endpoints: Vec<SocketAddr>,
}

#[derive(Debug, Clone, Error)]
pub enum OverlayError {
    #[error("overlay could not resolve node {0}")]
    NodeNotFound(NodeId),
}

/// A lazy sequence of peers, built with `futures::stream` per spec.md §4.5
/// ("lazy sequence").
pub type OverlayStream = Pin<Box<dyn Stream<Item = Arc<dyn Peer>> + Send>>;

/// A discovery signal: a new location became reachable, or a known node
/// disappeared.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Discovered(Location),
    Disappeared(NodeId),
}

/// Placement contract consumed by `doughnut-paxos`/`doughnut-local` to find
/// peers for an address, without depending on how placement is computed
/// (SPEC_FULL.md §4.5).
#[async_trait::async_trait]
pub trait Overlay: Send + Sync {
    /// Up to `n` peers suitable to host a *new* block at `address`.
    async fn allocate(&self, address: Address, n: usize) -> OverlayStream;

    /// Up to `n` peers believed to already hold `address`; `fast` may
    /// return a subset sooner at the cost of completeness.
    async fn lookup(&self, address: Address, n: usize, fast: bool) -> OverlayStream;

    async fn lookup_node(&self, id: NodeId) -> Result<Arc<dyn Peer>, OverlayError>;

    /// Bootstrap/membership query: register candidate locations.
    async fn discover(&self, locations: Vec<Location>);

    async fn discovered(&self, id: NodeId) -> bool;

    /// Subscribe to discovery/disappearance signals. `on_discovery` fires
    /// before `on_disappearance` for the same `(id, location)` pair
    /// (SPEC_FULL.md §5 "signal order").
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DiscoveryEvent>;
}
