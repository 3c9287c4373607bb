//! Connection cache and listener: the thing a node asks for "a `Peer` I
//! can call" and gets either a cached live connection or a freshly dialed
//! one (SPEC_FULL.md §4.4).
//!
//! Keys connections by `NodeId` the way `qc-01-peer-discovery::domain::
//! connection_slots::ConnectionSlots` keys its slot table, though that
//! manager tracks slots with a plain `HashMap` and leaves eviction to an
//! explicit caller; the weak-reference cache here (dead connections drop
//! out once nothing else holds them) has no teacher precedent and was
//! designed fresh for this crate.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use doughnut_crypto::KeyPair;
use doughnut_overlay::{Location, Peer};
use doughnut_types::NodeId;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::connection::Connection;
use crate::handshake::HandshakeError;

/// Owns this node's long-term identity and keeps a weak cache of live
/// connections keyed by peer id, so repeated `make_peer` calls for the
/// same node reuse one socket.
pub struct Dock {
    keys: KeyPair,
    local: Arc<dyn Peer>,
    peer_cache: Mutex<HashMap<NodeId, Weak<Connection>>>,
}

impl Dock {
    pub fn new(keys: KeyPair, local: Arc<dyn Peer>) -> Arc<Self> {
        Arc::new(Self {
            keys,
            local,
            peer_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Accept inbound connections forever on `addr`. Each accepted socket
    /// runs the server-side handshake and is cached the same way an
    /// outbound dial would be.
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let dock = self.clone();
            tokio::spawn(async move {
                match Connection::accept(stream, &dock.keys, dock.local.clone()).await {
                    Ok(conn) => {
                        info!(peer = %conn.peer_id(), %peer_addr, "accepted peer connection");
                        dock.peer_cache.lock().insert(conn.peer_id(), Arc::downgrade(&conn));
                    }
                    Err(e) => warn!(%peer_addr, error = %e, "handshake with inbound peer failed"),
                }
            });
        }
    }

    /// Dial `location`, or return the cached live connection if one exists
    /// for its pinned `NodeId`.
    pub async fn connect(self: &Arc<Self>, location: &Location) -> Result<Arc<Connection>, HandshakeError> {
        if let Some(id) = location.id {
            if let Some(conn) = self.cached(id) {
                return Ok(conn);
            }
        }

        let mut last_err = None;
        for endpoint in &location.endpoints {
            match TcpStream::connect(endpoint).await {
                Ok(stream) => {
                    let conn = Connection::dial(stream, &self.keys, location.id, self.local.clone()).await?;
                    self.peer_cache.lock().insert(conn.peer_id(), Arc::downgrade(&conn));
                    return Ok(conn);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(HandshakeError::Io(
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "no endpoints in location".into()),
        ))
    }

    fn cached(&self, id: NodeId) -> Option<Arc<Connection>> {
        let mut cache = self.peer_cache.lock();
        match cache.get(&id).and_then(Weak::upgrade) {
            Some(conn) if conn.is_connected() => Some(conn),
            _ => {
                cache.remove(&id);
                None
            }
        }
    }

    /// A `Peer` handle for `location`, dialing lazily and transparently
    /// reconnecting on failure (see `Remote`).
    pub fn make_peer(self: &Arc<Self>, location: Location) -> Arc<dyn Peer> {
        crate::remote::Remote::new(self.clone(), location)
    }
}
