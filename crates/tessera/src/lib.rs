//! # Tessera
//!
//! A replica of a decentralized, eventually consistent key/value store.
//!
//! ## Overview
//!
//! Peers exchange signed, optionally proof-of-work-stamped records and merge
//! them without coordination:
//!
//! - **Records**: Immutable, signed writes. A later write is a new record
//! - **Frozen keys**: `==name` belongs to its first writer, on every replica
//! - **Address-bound keys**: `:<address>.<rest>` may only be written by `<address>`
//! - **CRDTs**: Counters, lists and maps travel as change logs and merge
//!
//! ## Flow
//!
//! ```text
//! put:     build -> sign -> verify -> store -> broadcast
//! inbound: dedup -> verify -> resolve conflict -> store -> notify -> relay
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tessera::{Node, NodeConfig};
//! use tessera::identity::KeypairIdentity;
//! use tessera::net::{MemoryNetwork, PeerDescriptor, PeerId};
//! use tessera::store::MemoryStore;
//!
//! async fn example() -> tessera::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let (transport, inbox) = network.create_transport(PeerDescriptor::server(PeerId::random()));
//!
//!     let node = Arc::new(Node::new(
//!         MemoryStore::new(),
//!         transport,
//!         KeypairIdentity::new(),
//!         NodeConfig::default(),
//!     ));
//!     node.spawn_inbound_loop(inbox);
//!
//!     node.sign_up("alice", "correct horse").await?;
//!     node.put("greeting", json!("hello")).await?;
//!     let record = node.get("greeting").await?;
//!     assert!(record.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tessera::core` - Records, codecs, proof-of-work and CRDTs
//! - `tessera::store` - Storage adapter and backends
//! - `tessera::net` - Wire messages, deduplication and network adapter
//! - `tessera::identity` - Identity adapter and account envelopes

pub mod clock;
pub mod config;
pub mod conflict;
pub mod error;
pub mod events;
pub mod node;
pub mod verify;

// Re-export component crates
pub use tessera_core as core;
pub use tessera_identity as identity;
pub use tessera_net as net;
pub use tessera_store as store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::NodeConfig;
pub use conflict::{resolve, Resolution};
pub use error::{NodeError, Result};
pub use events::{ConflictReport, Notification, Side};
pub use node::{Node, Session, SharedCrdt};
pub use verify::{RecordPolicy, Verifier, VerifyResult};

// Re-export commonly used core types
pub use tessera_core::{
    Address, Counter, Crdt, CrdtKind, DynCrdt, Keypair, List, ListOp, Map, MapOp,
    VerificationRecord,
};
