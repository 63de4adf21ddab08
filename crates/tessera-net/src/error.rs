//! Error types for the network module.

use thiserror::Error;

use crate::transport::ConnectionId;

/// Errors that can occur while framing or moving messages.
#[derive(Debug, Error)]
pub enum NetError {
    /// Frame could not be encoded or decoded, or broke a limit.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Frame exceeds the size limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// No open connection with this id.
    #[error("connection not open: {0}")]
    NotConnected(ConnectionId),

    /// Peer is unknown to the transport.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    StoreError(#[from] tessera_store::StoreError),
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;
