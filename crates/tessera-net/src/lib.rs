//! # Tessera Net
//!
//! Wire messages, gossip deduplication and the network adapter for Tessera.
//!
//! ## Overview
//!
//! Nodes gossip signed records over an untrusted mesh. Every message carries
//! a random id (the deduplication key) and a `to` list of peers that have
//! already seen it, so a flood reaches each peer a bounded number of times.
//!
//! ## Key Properties
//!
//! - **Idempotent**: Receiving a message twice has no further effect
//! - **Order-independent**: Convergence never depends on delivery order
//! - **Bounded memory**: The deduplicator caps and ages out what it remembers
//!
//! ## Message Flow
//!
//! ```text
//! Node A                              Node B
//!   |-------- ping ------------------->|
//!   |<------- pong --------------------|
//!   |-------- subscribe(k) ----------->|
//!   |<------- put(k) ------------------|
//!   |-------- get(j) ----------------->|
//!   |<------- put(j) ------------------|
//! ```

pub mod convergence;
pub mod dedup;
pub mod error;
pub mod messages;
pub mod transport;

pub use convergence::{compare_stores, state_digest, verify_convergence, ConvergenceResult};
pub use dedup::{DedupConfig, Deduplicator};
pub use error::{NetError, Result};
pub use messages::{
    limits, MessageBody, MessageId, PeerDescriptor, PeerId, PeerKind, WireMessage,
};
pub use transport::{
    memory::MemoryNetwork, memory::MemoryTransport, ConnectionId, Inbound, Network, PeerEvent,
};
