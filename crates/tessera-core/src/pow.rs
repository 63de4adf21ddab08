//! Proof-of-work: an anti-spam throttle, not a security primitive.
//!
//! Expected cost grows as `16^difficulty` digest evaluations; there is no
//! upper bound on search time.

use crate::crypto::Digest;

/// Digest of `input || nonce`, with the nonce rendered in decimal.
pub fn nonce_digest(input: &[u8], nonce: u64) -> Digest {
    let mut data = Vec::with_capacity(input.len() + 20);
    data.extend_from_slice(input);
    data.extend_from_slice(nonce.to_string().as_bytes());
    Digest::compute(&data)
}

/// Search for a nonce whose digest has `difficulty` leading zero hex digits.
///
/// Difficulty 0 short-circuits to nonce 0.
pub fn proof_of_work(input: &[u8], difficulty: u32) -> (u64, Digest) {
    if difficulty == 0 {
        return (0, nonce_digest(input, 0));
    }

    let mut nonce = 0u64;
    loop {
        let hash = nonce_digest(input, nonce);
        if hash.leading_zero_digits() >= difficulty {
            return (nonce, hash);
        }
        nonce += 1;
    }
}

/// Check that `hash` meets `difficulty` and matches `input || nonce`.
pub fn check_proof(input: &[u8], nonce: u64, hash: &Digest, difficulty: u32) -> ProofCheck {
    if hash.leading_zero_digits() < difficulty {
        return ProofCheck::InsufficientWork;
    }
    if nonce_digest(input, nonce) != *hash {
        return ProofCheck::HashMismatch;
    }
    ProofCheck::Valid
}

/// Outcome of [`check_proof`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofCheck {
    Valid,
    InsufficientWork,
    HashMismatch,
}
