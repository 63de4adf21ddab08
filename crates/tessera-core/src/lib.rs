//! # Tessera Core
//!
//! Pure primitives for Tessera: verification records, codecs, proof-of-work
//! and the CRDT value engine.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`VerificationRecord`] - The signed unit of replication
//! - [`Address`] - A writer's public identity
//! - [`Digest`] - Keyed Blake3 digest binding a record's contents
//! - [`Counter`], [`List`], [`Map`] - Mergeable CRDT values
//!
//! ## Canonicalization
//!
//! Record digests are computed over deterministic CBOR. See [`codec`] module.

pub mod codec;
pub mod crdt;
pub mod crypto;
pub mod error;
pub mod keyspace;
pub mod pow;
pub mod record;
pub mod types;
pub mod validation;

pub use codec::{canonical_bytes, digest_input};
pub use crdt::{ChangeEntry, Counter, Crdt, CrdtKind, DynCrdt, List, ListOp, Map, MapOp};
pub use crypto::{Address, Digest, Keypair, Signature};
pub use error::{CoreError, CrdtError};
pub use keyspace::{address_key, crdt_log_key, crdt_log_prefix, frozen_key, KeySpace};
pub use pow::proof_of_work;
pub use record::{RecordBuilder, UnsignedRecord, VerificationRecord};
pub use types::{now_millis, ActorId};
pub use validation::{validate_record, ValidationContext, VerifyResult};

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
