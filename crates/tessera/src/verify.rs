//! The verification pipeline.
//!
//! Composes the pure gates from `tessera_core::validation` with the parts
//! that need node state: the stored record for frozen keys, the identity
//! adapter's signature check and an optional application policy.
//!
//! Gates run in a fixed order and the first failure wins:
//!
//! 1. structure
//! 2. timestamp
//! 3. frozen namespace
//! 4. address binding
//! 5. proof of work
//! 6. signature
//! 7. custom policy

use std::sync::Arc;

use tessera_core::validation::{
    check_address_binding, check_frozen, check_proof_of_work, check_structure, check_timestamp,
};
use tessera_core::VerificationRecord;
use tessera_identity::Identity;
use tessera_store::{Store, StoreError};
use tracing::debug;

pub use tessera_core::VerifyResult;

/// Application-defined acceptance rule, run after every built-in gate.
pub trait RecordPolicy: Send + Sync {
    fn accept(&self, record: &VerificationRecord) -> bool;
}

impl<F> RecordPolicy for F
where
    F: Fn(&VerificationRecord) -> bool + Send + Sync,
{
    fn accept(&self, record: &VerificationRecord) -> bool {
        self(record)
    }
}

/// Verification settings shared by every record a node sees.
#[derive(Clone, Default)]
pub struct Verifier {
    /// Required leading zero hex digits.
    pub difficulty: u32,
    /// Tolerated clock skew in milliseconds.
    pub max_clock_skew: i64,
    policy: Option<Arc<dyn RecordPolicy>>,
}

impl Verifier {
    pub fn new(difficulty: u32, max_clock_skew: i64) -> Self {
        Self {
            difficulty,
            max_clock_skew,
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn RecordPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Classify `record` at time `now`.
    ///
    /// Only storage failures are errors; everything about the record itself
    /// is expressed in the returned [`VerifyResult`].
    pub async fn verify<S, I>(
        &self,
        store: &S,
        identity: &I,
        record: &VerificationRecord,
        now: i64,
    ) -> Result<VerifyResult, StoreError>
    where
        S: Store + ?Sized,
        I: Identity + ?Sized,
    {
        if let Err(result) = check_structure(record)
            .and_then(|_| check_timestamp(record, now, self.max_clock_skew))
        {
            return Ok(result);
        }

        if record.is_frozen() {
            let existing = store.get(&record.key).await?;
            if let Err(result) = check_frozen(record, existing.as_ref()) {
                debug!(key = %record.key, "frozen key already claimed");
                return Ok(result);
            }
        }

        if let Err(result) = check_address_binding(record)
            .and_then(|_| check_proof_of_work(record, self.difficulty))
        {
            return Ok(result);
        }

        if !identity.verify_signature(record) {
            return Ok(VerifyResult::InvalidSignature);
        }

        if let Some(policy) = &self.policy {
            if !policy.accept(record) {
                return Ok(VerifyResult::CustomVerificationFailed);
            }
        }

        Ok(VerifyResult::Verified)
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("difficulty", &self.difficulty)
            .field("max_clock_skew", &self.max_clock_skew)
            .field("policy", &self.policy.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::{address_key, frozen_key, Keypair, RecordBuilder};
    use tessera_identity::KeypairIdentity;
    use tessera_store::MemoryStore;

    const NOW: i64 = 1_736_870_400_000;

    fn record(kp: &Keypair, key: &str, ts: i64) -> VerificationRecord {
        RecordBuilder::new(key, json!({"v": 1}), kp.address())
            .timestamp(ts)
            .sign(kp)
    }

    async fn run(verifier: &Verifier, store: &MemoryStore, record: &VerificationRecord) -> VerifyResult {
        let identity = KeypairIdentity::new();
        verifier.verify(store, &identity, record, NOW).await.unwrap()
    }

    #[tokio::test]
    async fn test_accepts_valid_record() {
        let kp = Keypair::generate();
        let store = MemoryStore::new();
        let verifier = Verifier::new(0, 30_000);
        assert_eq!(run(&verifier, &store, &record(&kp, "k", NOW)).await, VerifyResult::Verified);
    }

    #[tokio::test]
    async fn test_gate_order() {
        let kp = Keypair::generate();
        let store = MemoryStore::new();
        let verifier = Verifier::new(0, 30_000);

        // Future timestamp and bad signature: the timestamp gate fires first.
        let mut r = record(&kp, "k", NOW + 60_000);
        r.signature = tessera_core::Signature::ZERO;
        assert_eq!(run(&verifier, &store, &r).await, VerifyResult::InvalidTimestamp);

        // Wrong owner and bad signature: the address gate fires first.
        let other = Keypair::generate();
        let mut r = record(&kp, &address_key(&other.address(), "x"), NOW);
        r.signature = tessera_core::Signature::ZERO;
        assert_eq!(run(&verifier, &store, &r).await, VerifyResult::AddressMismatch);
    }

    #[tokio::test]
    async fn test_frozen_rereads_store() {
        let first = Keypair::generate();
        let second = Keypair::generate();
        let store = MemoryStore::new();
        let verifier = Verifier::new(0, 30_000);
        let key = frozen_key("alice");

        let early = record(&first, &key, NOW - 10);
        let late = record(&second, &key, NOW);
        store.put(&key, &early).await.unwrap();

        assert_eq!(run(&verifier, &store, &late).await, VerifyResult::CantOverwrite);
        // Same writer may refresh its own claim.
        assert_eq!(
            run(&verifier, &store, &record(&first, &key, NOW)).await,
            VerifyResult::Verified
        );

        // Reverse arrival: the earlier writer is let through.
        let store = MemoryStore::new();
        store.put(&key, &late).await.unwrap();
        assert_eq!(run(&verifier, &store, &early).await, VerifyResult::Verified);
    }

    #[tokio::test]
    async fn test_difficulty() {
        let kp = Keypair::generate();
        let store = MemoryStore::new();
        let verifier = Verifier::new(2, 30_000);

        let weak = record(&kp, "k", NOW);
        let strong = RecordBuilder::new("k", json!({"v": 1}), kp.address())
            .timestamp(NOW)
            .difficulty(2)
            .sign(&kp);

        // A lucky hash could already meet the target.
        if weak.hash.leading_zero_digits() < 2 {
            assert_eq!(run(&verifier, &store, &weak).await, VerifyResult::NoProofOfWork);
        }
        assert_eq!(run(&verifier, &store, &strong).await, VerifyResult::Verified);
    }

    #[tokio::test]
    async fn test_custom_policy_runs_last() {
        let kp = Keypair::generate();
        let store = MemoryStore::new();
        let policy: Arc<dyn RecordPolicy> =
            Arc::new(|record: &VerificationRecord| !record.key.starts_with("banned/"));
        let verifier = Verifier::new(0, 30_000).with_policy(policy);

        assert_eq!(
            run(&verifier, &store, &record(&kp, "banned/x", NOW)).await,
            VerifyResult::CustomVerificationFailed
        );
        assert_eq!(run(&verifier, &store, &record(&kp, "ok/x", NOW)).await, VerifyResult::Verified);

        let mut forged = record(&kp, "banned/x", NOW);
        forged.signature = tessera_core::Signature::ZERO;
        assert_eq!(run(&verifier, &store, &forged).await, VerifyResult::InvalidSignature);
    }
}
