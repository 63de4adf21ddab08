//! Notifications emitted by a node.
//!
//! Everything that happens asynchronously (records arriving from peers,
//! conflicts, rejections) is reported here rather than through a call's
//! return value.

use tessera_core::{Address, VerifyResult};
use tessera_net::{ConnectionId, PeerDescriptor};
use tokio::sync::broadcast;

/// Buffered notifications per subscriber before the slowest one lags.
pub const NOTIFICATION_CAPACITY: usize = 256;

/// Which copy won a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The record that was already stored.
    Local,
    /// The record that just arrived.
    Remote,
}

/// Both claims to a frozen key and which one won.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub key: String,
    pub winner: Side,
    pub local_address: Address,
    pub local_timestamp: i64,
    pub remote_address: Address,
    pub remote_timestamp: i64,
}

impl ConflictReport {
    pub fn winning_address(&self) -> Address {
        match self.winner {
            Side::Local => self.local_address,
            Side::Remote => self.remote_address,
        }
    }

    pub fn losing_address(&self) -> Address {
        match self.winner {
            Side::Local => self.remote_address,
            Side::Remote => self.local_address,
        }
    }
}

/// A node event.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A record was written to the local store.
    RecordStored { key: String, address: Address },
    /// Inbound change entries were merged into a registered CRDT.
    CrdtMerged { key: String, new_entries: usize },
    /// Two writers claimed the same frozen key.
    ConflictResolved(ConflictReport),
    /// The signed-in address lost a frozen key to an earlier writer.
    ClaimSuperseded { key: String, winner: Address },
    /// An inbound record failed verification. `key` is `None` when the
    /// frame could not be decoded.
    Rejected {
        key: Option<String>,
        result: VerifyResult,
        connection: ConnectionId,
    },
    /// A peer announced itself on a connection.
    PeerConnected {
        connection: ConnectionId,
        peer: PeerDescriptor,
    },
    /// A connection closed.
    PeerDisconnected { connection: ConnectionId },
}

pub(crate) fn channel() -> broadcast::Sender<Notification> {
    broadcast::channel(NOTIFICATION_CAPACITY).0
}
