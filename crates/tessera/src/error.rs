//! Error types for the node.

use tessera_core::{Address, CrdtError, VerifyResult};
use tessera_identity::IdentityError;
use tessera_net::NetError;
use tessera_store::StoreError;
use thiserror::Error;

/// Errors returned by [`Node`](crate::Node) operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A locally built record failed its own verification.
    #[error("record {key} rejected: {result}")]
    Rejected { key: String, result: VerifyResult },

    /// The username is already claimed.
    #[error("user {username} already exists (owner {address}, since {timestamp})")]
    UserExists {
        username: String,
        address: Address,
        timestamp: i64,
    },

    /// No account record could be found locally or on the network.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The account exists but the password does not open it.
    #[error("wrong password")]
    WrongPassword,

    /// No CRDT instance is registered under the key.
    #[error("no crdt registered for {0}")]
    NotRegistered(String),

    /// Initialization of the store or identity failed.
    #[error("node not ready: {0}")]
    NotReady(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Network error.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// Identity error.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// CRDT error.
    #[error("crdt error: {0}")]
    Crdt(#[from] CrdtError),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
