//! VerificationRecord: the unit of replication.
//!
//! A record is an immutable, signed key/value write. Once signed it travels
//! by value and is never edited; a later write to the same key is a new
//! record that may replace it in storage.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::codec;
use crate::crdt::CrdtKind;
use crate::crypto::{Address, Digest, Keypair, Signature};
use crate::error::CoreError;
use crate::keyspace::KeySpace;
use crate::pow;

/// A signed, proof-of-work-stamped write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Storage key. `==name` is frozen, `:<address>.<rest>` is address-bound.
    pub key: String,

    /// Arbitrary payload; for CRDT records the change log.
    pub value: serde_json::Value,

    /// The writer's public identity.
    pub address: Address,

    /// Writer-claimed creation time (Unix milliseconds).
    pub timestamp: i64,

    /// Proof-of-work nonce.
    pub nonce: u64,

    /// Keyed digest of `canonical(value, address, timestamp) || nonce`.
    pub hash: Digest,

    /// Signature over `hash`.
    pub signature: Signature,

    /// CRDT algebra of `value`, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crdt: Option<CrdtKind>,
}

impl VerificationRecord {
    /// Proof-of-work input (before the nonce is appended).
    pub fn digest_input(&self) -> Vec<u8> {
        codec::digest_input(&self.value, &self.address, self.timestamp)
    }

    /// Namespace of this record's key.
    pub fn keyspace(&self) -> KeySpace<'_> {
        KeySpace::of(&self.key)
    }

    /// Check if the key lives in the frozen namespace.
    pub fn is_frozen(&self) -> bool {
        self.keyspace().is_frozen()
    }

    /// Verify the signature over `hash` against `address`.
    pub fn verify_signature(&self) -> Result<(), CoreError> {
        self.address.verify(self.hash.as_bytes(), &self.signature)
    }

    /// First-writer order for frozen keys: older timestamp first, then the
    /// smaller address.
    pub fn first_writer_cmp(&self, other: &Self) -> Ordering {
        (self.timestamp, self.address).cmp(&(other.timestamp, other.address))
    }

    /// Check if `self` beats `other` as the owner of a frozen key.
    pub fn precedes(&self, other: &Self) -> bool {
        self.first_writer_cmp(other) == Ordering::Less
    }

    /// Last-writer order for ordinary keys: newer timestamp wins, ties go to
    /// the greater hash.
    pub fn supersedes(&self, other: &Self) -> bool {
        (self.timestamp, self.hash) > (other.timestamp, other.hash)
    }
}

/// Builder for creating records.
pub struct RecordBuilder {
    key: String,
    value: serde_json::Value,
    address: Address,
    timestamp: i64,
    difficulty: u32,
    crdt: Option<CrdtKind>,
}

impl RecordBuilder {
    /// Start building a record.
    pub fn new(key: impl Into<String>, value: serde_json::Value, address: Address) -> Self {
        Self {
            key: key.into(),
            value,
            address,
            timestamp: 0,
            difficulty: 0,
            crdt: None,
        }
    }

    /// Set the timestamp.
    pub fn timestamp(mut self, ts: i64) -> Self {
        self.timestamp = ts;
        self
    }

    /// Set the proof-of-work difficulty (leading zero hex digits).
    pub fn difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Mark the value as a CRDT change log.
    pub fn crdt(mut self, kind: CrdtKind) -> Self {
        self.crdt = Some(kind);
        self
    }

    /// Run the proof-of-work and produce a record awaiting its signature.
    pub fn build(self) -> UnsignedRecord {
        let input = codec::digest_input(&self.value, &self.address, self.timestamp);
        let (nonce, hash) = pow::proof_of_work(&input, self.difficulty);
        UnsignedRecord {
            key: self.key,
            value: self.value,
            address: self.address,
            timestamp: self.timestamp,
            nonce,
            hash,
            crdt: self.crdt,
        }
    }

    /// Build and sign with a local keypair.
    pub fn sign(self, keypair: &Keypair) -> VerificationRecord {
        self.build().sign(keypair)
    }
}

/// A record with its proof-of-work done but not yet signed.
#[derive(Debug, Clone)]
pub struct UnsignedRecord {
    key: String,
    value: serde_json::Value,
    address: Address,
    timestamp: i64,
    nonce: u64,
    hash: Digest,
    crdt: Option<CrdtKind>,
}

impl UnsignedRecord {
    /// The digest the signature must cover.
    pub fn hash(&self) -> &Digest {
        &self.hash
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Sign with a local keypair.
    pub fn sign(self, keypair: &Keypair) -> VerificationRecord {
        let signature = keypair.sign(self.hash.as_bytes());
        self.with_signature(signature)
    }

    /// Attach a signature produced elsewhere (e.g. by an identity adapter).
    pub fn with_signature(self, signature: Signature) -> VerificationRecord {
        VerificationRecord {
            key: self.key,
            value: self.value,
            address: self.address,
            timestamp: self.timestamp,
            nonce: self.nonce,
            hash: self.hash,
            signature,
            crdt: self.crdt,
        }
    }
}
