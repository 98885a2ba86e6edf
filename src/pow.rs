//! Proof-of-work seal verification.
//!
//! The kernel treats the PoW algorithm as pluggable: the import path only
//! asks whether a validator accepts a header. `BlakePowValidator` is the
//! built-in target check used by the reference network; the digest it
//! verifies is blake3 over the pre-seal hash, the nonce and the solution
//! bytes.

use primitive_types::U256;

use crate::types::Hash;

/// Opaque PoW acceptance check, dispatched per header on import.
pub trait PowValidator: Send + Sync {
    fn accepts(&self, pre_seal_hash: &Hash, nonce: u64, solution: &[u8], difficulty: u64) -> bool;
}

/// Map a difficulty scalar to a U256 target. Higher difficulty, lower target.
pub fn pow_target(difficulty: u64) -> U256 {
    U256::MAX / U256::from(difficulty.max(1))
}

/// Digest a candidate seal attempt.
pub fn pow_digest(pre_seal_hash: &Hash, nonce: u64, solution: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(pre_seal_hash);
    hasher.update(&nonce.to_be_bytes());
    hasher.update(solution);
    *hasher.finalize().as_bytes()
}

/// Built-in blake3 target check.
pub struct BlakePowValidator;

impl PowValidator for BlakePowValidator {
    fn accepts(&self, pre_seal_hash: &Hash, nonce: u64, solution: &[u8], difficulty: u64) -> bool {
        let digest = pow_digest(pre_seal_hash, nonce, solution);
        U256::from_big_endian(&digest) <= pow_target(difficulty)
    }
}

/// Search for a nonce whose digest meets the target. Used by sealers and
/// tests; returns `None` if the budget runs out.
pub fn mine(pre_seal_hash: &Hash, difficulty: u64, max_iterations: u64) -> Option<u64> {
    let target = pow_target(difficulty);
    for nonce in 0..max_iterations {
        let digest = pow_digest(pre_seal_hash, nonce, &[]);
        if U256::from_big_endian(&digest) <= target {
            return Some(nonce);
        }
    }
    None
}
