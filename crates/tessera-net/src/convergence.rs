//! Convergence verification.
//!
//! Replicas can check they hold the same records under a key prefix by
//! comparing a deterministic digest instead of exchanging the records.

use tessera_core::Digest;
use tessera_store::Store;

use crate::error::Result;

/// Context string for the convergence digest.
pub const CONVERGENCE_CONTEXT: &str = "tessera 2024-06 convergence digest v1";

/// Compute a deterministic digest of every record under `prefix`.
///
/// Algorithm:
/// 1. List keys under `prefix` in ascending order
/// 2. Hash: H = Blake3(len(key) || key || record.hash) for each key in order
/// 3. Return final H, or `None` if there are no records
pub async fn state_digest<S: Store + ?Sized>(store: &S, prefix: &str) -> Result<Option<Digest>> {
    let keys = store.query(prefix).await?;
    if keys.is_empty() {
        return Ok(None);
    }

    let mut hasher = blake3::Hasher::new_derive_key(CONVERGENCE_CONTEXT);
    hasher.update(prefix.as_bytes());
    let mut hashed = 0usize;
    for key in keys {
        let Some(record) = store.get(&key).await? else {
            continue;
        };
        hasher.update(&(key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update(record.hash.as_bytes());
        hashed += 1;
    }

    if hashed == 0 {
        return Ok(None);
    }
    Ok(Some(Digest::from_bytes(*hasher.finalize().as_bytes())))
}

/// Compare the local digest under `prefix` against a remote one.
pub async fn verify_convergence<S: Store + ?Sized>(
    local_store: &S,
    prefix: &str,
    remote_digest: Option<&Digest>,
) -> Result<ConvergenceResult> {
    let local = state_digest(local_store, prefix).await?;
    Ok(match (local, remote_digest) {
        (None, None) => ConvergenceResult::Converged,
        (Some(l), Some(r)) if &l == r => ConvergenceResult::Converged,
        (None, Some(_)) => ConvergenceResult::NotConverged {
            reason: "no local records".into(),
        },
        (Some(_), None) => ConvergenceResult::NotConverged {
            reason: "no remote records".into(),
        },
        (Some(_), Some(_)) => ConvergenceResult::NotConverged {
            reason: "state digest mismatch".into(),
        },
    })
}

/// Compare two stores directly.
pub async fn compare_stores<A: Store + ?Sized, B: Store + ?Sized>(
    a: &A,
    b: &B,
    prefix: &str,
) -> Result<ConvergenceResult> {
    let remote = state_digest(b, prefix).await?;
    verify_convergence(a, prefix, remote.as_ref()).await
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both replicas hold identical records.
    Converged,
    /// Replicas differ (may need more gossip).
    NotConverged { reason: String },
}

impl ConvergenceResult {
    /// Check if replicas have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}
