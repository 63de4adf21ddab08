//! Error types for Tessera Core.

use thiserror::Error;

/// Core errors that can occur while encoding, decoding or signing records.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("invalid length for {what}: expected {expected}, got {got}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Errors raised by the CRDT value engine.
#[derive(Debug, Error, PartialEq)]
pub enum CrdtError {
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("expected a {expected} change log, got {got}")]
    KindMismatch {
        expected: crate::crdt::CrdtKind,
        got: crate::crdt::CrdtKind,
    },

    #[error("malformed change log: {0}")]
    MalformedChanges(String),

    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    #[error("sequence numbers exhausted")]
    ClockExhausted,
}
