//! Staking-seal primitives: the chained seed, the stake oracle contract and
//! the stake-weighted minimum block spacing.
//!
//! A staker's seed for block N is their ed25519 signature over the seed of
//! the previous staking block, which makes the sequence unbiasable without
//! the signing key. The seed also draws the staker's minimum wait: hash the
//! seed, read it as a uniform fraction, and scale the exponential draw by
//! difficulty over stake.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

use crate::types::{blake3_hash, Address};

/// External stake lookup. A failure here is a process-level fault (the view
/// of the staking ledger is unavailable), never a per-block rejection.
pub trait StakeOracle: Send + Sync {
    fn effective_stake(&self, signer: &Address, coinbase: &Address) -> Result<u128, StakeOracleError>;
}

#[derive(Debug, Error)]
pub enum StakeOracleError {
    #[error("stake oracle fault: {0}")]
    Fatal(String),
}

/// Oracle for deployments without a staking ledger: every signer has zero
/// stake, so staking seals never validate.
pub struct NoStake;

impl StakeOracle for NoStake {
    fn effective_stake(&self, _: &Address, _: &Address) -> Result<u128, StakeOracleError> {
        Ok(0)
    }
}

/// Verify that `seed` signs `previous_seed` under `signing_pub`.
pub fn verify_seed_chain(seed: &[u8], previous_seed: &[u8], signing_pub: &[u8; 32]) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(signing_pub) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(seed) else {
        return false;
    };
    vk.verify(previous_seed, &sig).is_ok()
}

/// Verify a staking block signature over the pre-seal hash.
pub fn verify_block_signature(
    signature: &[u8],
    pre_seal_hash: &[u8; 32],
    signing_pub: &[u8; 32],
) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(signing_pub) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    vk.verify(pre_seal_hash, &sig).is_ok()
}

/// Minimum seconds between the previous staking block and one sealed with
/// `seed` at `difficulty` by a staker holding `stake`.
///
/// The draw is `difficulty * -ln(u) / stake` with `u` uniform in (0, 1]
/// taken from the upper 64 bits of the seed hash; clamped to at least one
/// second so zero-wait blocks are impossible.
pub fn stake_delta_secs(seed: &[u8], difficulty: u64, stake: u128) -> u64 {
    let h = blake3_hash(seed);
    let mut hi_bytes = [0u8; 8];
    hi_bytes.copy_from_slice(&h[0..8]);
    let hi = u64::from_be_bytes(hi_bytes);

    // (hi + 1) / 2^64 lies in (0, 1]; -ln of it is the exponential draw
    let fraction = (hi as f64 + 1.0) / (u64::MAX as f64 + 1.0);
    let draw = -fraction.ln();

    let delta = (difficulty as f64) * draw / (stake.max(1) as f64);
    (delta.ceil() as u64).max(1)
}
