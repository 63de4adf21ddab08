//! Network adapter: the narrow interface the node uses to move frames.
//!
//! Implementations own connection management, reconnection and backoff.
//! The node only sends messages, and observes inbound frames and
//! connect/disconnect events as [`Inbound`] values.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::messages::{PeerDescriptor, WireMessage};

/// Handle of one wire connection, local to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
}

/// Everything a transport delivers to its node.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A raw frame arrived on `connection`.
    Message { connection: ConnectionId, frame: Bytes },
    /// A connection opened or closed.
    Peer(PeerEvent),
}

/// Network trait for sending messages to peers.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Network: Send + Sync {
    /// This node's descriptor, as announced in `ping`/`pong`.
    fn local_peer(&self) -> PeerDescriptor;

    /// Send to every open connection whose peer is not listed in
    /// `message.to`. With `cross_server_only`, only registered server peers
    /// are targeted. Returns how many connections the message was sent on.
    async fn send_to_all(&self, message: &WireMessage, cross_server_only: bool) -> Result<usize>;

    /// Send on a single connection.
    async fn send(&self, connection: ConnectionId, message: &WireMessage) -> Result<()>;

    /// Check if a connection is open.
    fn is_connected(&self, connection: ConnectionId) -> bool;

    /// Associate a connection with the peer identity it announced.
    fn register_connection(&self, connection: ConnectionId, peer: PeerDescriptor);

    /// The identity registered for a connection, if any.
    fn peer_of(&self, connection: ConnectionId) -> Option<PeerDescriptor>;
}

/// An in-process mesh for tests and local clusters.
///
/// Every transport gets an unbounded inbox; links are explicit, so tests
/// can build any topology and partition it at will.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard};
    use tokio::sync::mpsc;
    use tracing::debug;

    use crate::error::NetError;
    use crate::messages::{PeerId, PeerKind};

    struct Link {
        remote: PeerId,
        remote_connection: ConnectionId,
        registered: Option<PeerDescriptor>,
    }

    struct Endpoint {
        descriptor: PeerDescriptor,
        inbox: mpsc::UnboundedSender<Inbound>,
        links: HashMap<ConnectionId, Link>,
    }

    #[derive(Default)]
    struct Mesh {
        next_connection: u64,
        endpoints: HashMap<PeerId, Endpoint>,
    }

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        mesh: Mutex<Mesh>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn mesh(&self) -> MutexGuard<'_, Mesh> {
            self.mesh.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// Create a transport for `descriptor` and the receiver of its inbound traffic.
        pub fn create_transport(
            self: &Arc<Self>,
            descriptor: PeerDescriptor,
        ) -> (MemoryTransport, mpsc::UnboundedReceiver<Inbound>) {
            let (tx, rx) = mpsc::unbounded_channel();
            self.mesh().endpoints.insert(
                descriptor.peer_id.clone(),
                Endpoint {
                    descriptor: descriptor.clone(),
                    inbox: tx,
                    links: HashMap::new(),
                },
            );
            let transport = MemoryTransport {
                descriptor,
                network: Arc::clone(self),
            };
            (transport, rx)
        }

        /// Open a link between two peers. Both sides observe `Connected`.
        pub fn connect(&self, a: &PeerId, b: &PeerId) -> Result<(ConnectionId, ConnectionId)> {
            let mut mesh = self.mesh();
            for peer in [a, b] {
                if !mesh.endpoints.contains_key(peer) {
                    return Err(NetError::PeerNotFound(peer.to_string()));
                }
            }

            let conn_a = ConnectionId(mesh.next_connection);
            let conn_b = ConnectionId(mesh.next_connection + 1);
            mesh.next_connection += 2;

            for (local, remote, local_conn, remote_conn) in
                [(a, b, conn_a, conn_b), (b, a, conn_b, conn_a)]
            {
                if let Some(endpoint) = mesh.endpoints.get_mut(local) {
                    endpoint.links.insert(
                        local_conn,
                        Link {
                            remote: remote.clone(),
                            remote_connection: remote_conn,
                            registered: None,
                        },
                    );
                    let _ = endpoint.inbox.send(Inbound::Peer(PeerEvent::Connected(local_conn)));
                }
            }
            debug!(%a, %b, "memory link opened");
            Ok((conn_a, conn_b))
        }

        /// Close every link between two peers. Both sides observe `Disconnected`.
        pub fn disconnect(&self, a: &PeerId, b: &PeerId) {
            let mut mesh = self.mesh();
            for (local, remote) in [(a, b), (b, a)] {
                if let Some(endpoint) = mesh.endpoints.get_mut(local) {
                    let closed: Vec<ConnectionId> = endpoint
                        .links
                        .iter()
                        .filter(|(_, link)| &link.remote == remote)
                        .map(|(conn, _)| *conn)
                        .collect();
                    for conn in closed {
                        endpoint.links.remove(&conn);
                        let _ = endpoint.inbox.send(Inbound::Peer(PeerEvent::Disconnected(conn)));
                    }
                }
            }
            debug!(%a, %b, "memory link closed");
        }

        /// Descriptors of every attached transport.
        pub fn peers(&self) -> Vec<PeerDescriptor> {
            let mut peers: Vec<PeerDescriptor> = self
                .mesh()
                .endpoints
                .values()
                .map(|endpoint| endpoint.descriptor.clone())
                .collect();
            peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
            peers
        }

        /// Connect every pair of the given peers.
        pub fn connect_all(&self, peers: &[PeerId]) -> Result<()> {
            for (i, a) in peers.iter().enumerate() {
                for b in &peers[i + 1..] {
                    self.connect(a, b)?;
                }
            }
            Ok(())
        }

        fn deliver(&self, from: &PeerId, connection: ConnectionId, frame: Bytes) -> Result<()> {
            let mesh = self.mesh();
            let link = mesh
                .endpoints
                .get(from)
                .and_then(|endpoint| endpoint.links.get(&connection))
                .ok_or(NetError::NotConnected(connection))?;
            let remote = mesh
                .endpoints
                .get(&link.remote)
                .ok_or_else(|| NetError::PeerNotFound(link.remote.to_string()))?;
            remote
                .inbox
                .send(Inbound::Message {
                    connection: link.remote_connection,
                    frame,
                })
                .map_err(|_| NetError::TransportError("peer inbox closed".into()))
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        descriptor: PeerDescriptor,
        network: Arc<MemoryNetwork>,
    }

    impl MemoryTransport {
        /// The network this transport is attached to.
        pub fn network(&self) -> &Arc<MemoryNetwork> {
            &self.network
        }
    }

    #[async_trait]
    impl Network for MemoryTransport {
        fn local_peer(&self) -> PeerDescriptor {
            self.descriptor.clone()
        }

        async fn send_to_all(&self, message: &WireMessage, cross_server_only: bool) -> Result<usize> {
            let frame = message.encode()?;
            let targets: Vec<ConnectionId> = {
                let mesh = self.network.mesh();
                let Some(endpoint) = mesh.endpoints.get(&self.descriptor.peer_id) else {
                    return Ok(0);
                };
                endpoint
                    .links
                    .iter()
                    .filter(|(_, link)| !message.was_seen_by(&link.remote))
                    .filter(|(_, link)| {
                        !cross_server_only
                            || link
                                .registered
                                .as_ref()
                                .is_some_and(|peer| peer.kind == PeerKind::Server)
                    })
                    .map(|(conn, _)| *conn)
                    .collect()
            };

            let mut sent = 0;
            for conn in targets {
                // A link closing mid-broadcast only skips that peer.
                if self.network.deliver(&self.descriptor.peer_id, conn, frame.clone()).is_ok() {
                    sent += 1;
                }
            }
            Ok(sent)
        }

        async fn send(&self, connection: ConnectionId, message: &WireMessage) -> Result<()> {
            let frame = message.encode()?;
            self.network.deliver(&self.descriptor.peer_id, connection, frame)
        }

        fn is_connected(&self, connection: ConnectionId) -> bool {
            self.network
                .mesh()
                .endpoints
                .get(&self.descriptor.peer_id)
                .is_some_and(|endpoint| endpoint.links.contains_key(&connection))
        }

        fn register_connection(&self, connection: ConnectionId, peer: PeerDescriptor) {
            let mut mesh = self.network.mesh();
            if let Some(link) = mesh
                .endpoints
                .get_mut(&self.descriptor.peer_id)
                .and_then(|endpoint| endpoint.links.get_mut(&connection))
            {
                link.registered = Some(peer);
            }
        }

        fn peer_of(&self, connection: ConnectionId) -> Option<PeerDescriptor> {
            self.network
                .mesh()
                .endpoints
                .get(&self.descriptor.peer_id)
                .and_then(|endpoint| endpoint.links.get(&connection))
                .and_then(|link| link.registered.clone())
        }
    }

    impl std::fmt::Debug for MemoryTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MemoryTransport")
                .field("peer", &self.descriptor)
                .finish()
        }
    }
}
