//! Error types for the identity adapter.

use thiserror::Error;

/// Errors that can occur during identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No keypair is loaded yet.
    #[error("identity not initialized")]
    NotInitialized,

    /// The password did not open the account envelope.
    #[error("wrong password")]
    WrongPassword,

    /// Password-based key derivation failed.
    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    /// Encryption error.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// The envelope decrypted but does not describe a usable account.
    #[error("malformed account envelope: {0}")]
    MalformedEnvelope(String),

    /// Envelope written by an unknown format version.
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    /// A blocking key-derivation task failed to complete.
    #[error("task failed: {0}")]
    Task(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] tessera_core::CoreError),
}

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;
