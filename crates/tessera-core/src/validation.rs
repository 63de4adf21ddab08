//! Record validation: the pure gates of the verification pipeline.
//!
//! Each gate returns `Err(VerifyResult)` naming the first failure. The
//! stateful pipeline (store lookups, identity adapter, custom policy) lives
//! in the orchestrator and composes these in order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::keyspace::{KeySpace, MAX_KEY_LEN};
use crate::pow::{self, ProofCheck};
use crate::record::VerificationRecord;

/// Outcome of verifying a record. Every variant except `Verified` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerifyResult {
    Verified,
    InvalidData,
    InvalidTimestamp,
    AddressMismatch,
    CantOverwrite,
    NoProofOfWork,
    InvalidHashNonce,
    InvalidSignature,
    CustomVerificationFailed,
}

impl VerifyResult {
    pub fn is_verified(self) -> bool {
        self == VerifyResult::Verified
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Inputs the pure gates need besides the record itself.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Current time (Unix milliseconds).
    pub now: i64,
    /// Tolerated writer clock skew into the future (milliseconds).
    pub max_clock_skew: i64,
    /// Required leading zero hex digits.
    pub difficulty: u32,
    /// The record currently stored under the same key.
    pub existing: Option<&'a VerificationRecord>,
}

/// Gate 1: key and payload shape.
pub fn check_structure(record: &VerificationRecord) -> Result<(), VerifyResult> {
    if record.key.is_empty() || record.key.len() > MAX_KEY_LEN {
        return Err(VerifyResult::InvalidData);
    }
    if record.value.is_null() {
        return Err(VerifyResult::InvalidData);
    }
    if record.crdt.is_some() && !record.value.is_array() {
        return Err(VerifyResult::InvalidData);
    }
    Ok(())
}

/// Gate 2: reject records claiming to come from the future.
pub fn check_timestamp(
    record: &VerificationRecord,
    now: i64,
    max_clock_skew: i64,
) -> Result<(), VerifyResult> {
    if record.timestamp > now.saturating_add(max_clock_skew) {
        return Err(VerifyResult::InvalidTimestamp);
    }
    Ok(())
}

/// Gate 3: a frozen key already owned by another address only admits a
/// writer that comes earlier in first-writer order.
pub fn check_frozen(
    record: &VerificationRecord,
    existing: Option<&VerificationRecord>,
) -> Result<(), VerifyResult> {
    if !record.is_frozen() {
        return Ok(());
    }
    match existing {
        Some(stored) if stored.address != record.address && stored.precedes(record) => {
            Err(VerifyResult::CantOverwrite)
        }
        _ => Ok(()),
    }
}

/// Gate 4: an address-bound key may only be written by its address.
pub fn check_address_binding(record: &VerificationRecord) -> Result<(), VerifyResult> {
    if let KeySpace::AddressBound { address, .. } = record.keyspace() {
        if address != record.address.to_hex() {
            return Err(VerifyResult::AddressMismatch);
        }
    }
    Ok(())
}

/// Gate 5: proof-of-work. The hash must always match its inputs; the
/// leading-zero requirement applies only when `difficulty > 0`.
pub fn check_proof_of_work(record: &VerificationRecord, difficulty: u32) -> Result<(), VerifyResult> {
    match pow::check_proof(&record.digest_input(), record.nonce, &record.hash, difficulty) {
        ProofCheck::Valid => Ok(()),
        ProofCheck::InsufficientWork => Err(VerifyResult::NoProofOfWork),
        ProofCheck::HashMismatch => Err(VerifyResult::InvalidHashNonce),
    }
}

/// Gate 6: signature over `hash` against `address`.
pub fn check_signature(record: &VerificationRecord) -> Result<(), VerifyResult> {
    record
        .verify_signature()
        .map_err(|_| VerifyResult::InvalidSignature)
}

/// Run gates 1 through 6 in order, short-circuiting on the first failure.
pub fn validate_record(record: &VerificationRecord, ctx: &ValidationContext<'_>) -> VerifyResult {
    let result = check_structure(record)
        .and_then(|_| check_timestamp(record, ctx.now, ctx.max_clock_skew))
        .and_then(|_| check_frozen(record, ctx.existing))
        .and_then(|_| check_address_binding(record))
        .and_then(|_| check_proof_of_work(record, ctx.difficulty))
        .and_then(|_| check_signature(record));
    match result {
        Ok(()) => VerifyResult::Verified,
        Err(failure) => failure,
    }
}
