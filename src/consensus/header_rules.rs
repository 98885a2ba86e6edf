//! Header validation, dispatched on the candidate's seal type.
//!
//! The caller resolves the ancestry the rules need: the direct parent, the
//! nearest same-seal ancestor (the synthetic staking genesis stands in for
//! staking blocks before any real one exists) and the same-seal ancestor
//! above that, which the difficulty recomputation wants. Absence of the
//! latter near genesis or the fork boundary is expected and handled by the
//! policy's no-grandparent fallback, not by failing.

use thiserror::Error;
use tracing::debug;

use crate::config::ChainParams;
use crate::consensus::difficulty::next_difficulty;
use crate::consensus::staking::{
    stake_delta_secs, verify_block_signature, verify_seed_chain, StakeOracle, StakeOracleError,
};
use crate::consensus::RejectReason;
use crate::pow::PowValidator;
use crate::types::{address_of, BlockHeader, SealData, SealType, MAX_EXTRA_DATA_BYTES};

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error(transparent)]
    Rejected(#[from] RejectReason),
    /// The stake oracle could not answer; continuing would risk divergence,
    /// so this aborts the import instead of rejecting the block.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<StakeOracleError> for HeaderError {
    fn from(e: StakeOracleError) -> Self {
        HeaderError::Fatal(e.to_string())
    }
}

/// Ancestry the header rules evaluate against.
pub struct HeaderContext<'a> {
    pub parent: &'a BlockHeader,
    /// Nearest ancestor sealed like the candidate (synthetic staking genesis
    /// allowed). For a mining candidate on an alternating chain this is the
    /// parent's antiparent or the parent itself.
    pub same_seal_parent: &'a BlockHeader,
    pub same_seal_grandparent: Option<&'a BlockHeader>,
    pub now: u64,
}

pub fn validate_header(
    header: &BlockHeader,
    ctx: &HeaderContext<'_>,
    params: &ChainParams,
    pow: &dyn PowValidator,
    stake: &dyn StakeOracle,
) -> Result<(), HeaderError> {
    if header.height != ctx.parent.height + 1 {
        return Err(RejectReason::WrongHeight {
            got: header.height,
            parent: ctx.parent.height,
        }
        .into());
    }

    // the fork gate comes before everything else: a staking seal below the
    // activation height is invalid no matter what the rest of the header says
    if header.seal_type() == SealType::Staking && header.height < params.unity_fork_height {
        return Err(RejectReason::StakingBeforeFork {
            height: header.height,
            fork: params.unity_fork_height,
        }
        .into());
    }

    if header.extra_data.len() > MAX_EXTRA_DATA_BYTES {
        return Err(RejectReason::ExtraDataTooLong(header.extra_data.len()).into());
    }

    let drift_limit = ctx.now + params.clock_drift_secs;
    if header.timestamp > drift_limit {
        return Err(RejectReason::FutureTimestamp { ts: header.timestamp, limit: drift_limit }.into());
    }

    // energy limit moves by at most parent/divisor and never under the floor
    let parent_limit = ctx.parent.energy_limit;
    let max_step = parent_limit / params.energy_limit_divisor.max(1);
    let delta = header.energy_limit.abs_diff(parent_limit);
    if delta > max_step || header.energy_limit < params.min_energy_limit {
        return Err(RejectReason::EnergyLimitOutOfBounds {
            limit: header.energy_limit,
            parent: parent_limit,
        }
        .into());
    }

    let expected_difficulty = next_difficulty(
        header.seal_type(),
        ctx.same_seal_parent,
        ctx.same_seal_grandparent,
        params,
    );
    if header.difficulty != expected_difficulty {
        return Err(RejectReason::DifficultyMismatch {
            declared: header.difficulty,
            expected: expected_difficulty,
        }
        .into());
    }

    match &header.seal {
        SealData::Mining { nonce, solution } => {
            if header.timestamp <= ctx.parent.timestamp {
                return Err(RejectReason::TimestampNotAfterParent.into());
            }
            if !pow.accepts(&header.pre_seal_hash(), *nonce, solution, header.difficulty) {
                debug!(height = header.height, "pow solution rejected");
                return Err(RejectReason::PowRejected.into());
            }
        }
        SealData::Staking { seed, signing_pub, signature } => {
            let SealData::Staking { seed: prev_seed, .. } = &ctx.same_seal_parent.seal else {
                // caller resolved the wrong ancestor; treat as unverifiable
                return Err(RejectReason::BadSeed.into());
            };
            if !verify_seed_chain(seed, prev_seed, signing_pub) {
                return Err(RejectReason::BadSeed.into());
            }

            let signer = address_of(signing_pub);
            let stake_amount = stake.effective_stake(&signer, &header.coinbase)?;
            if stake_amount == 0 {
                return Err(RejectReason::ZeroStake.into());
            }

            let delta = stake_delta_secs(seed, header.difficulty, stake_amount);
            let min_ts = ctx.same_seal_parent.timestamp.saturating_add(delta);
            if header.timestamp < min_ts {
                return Err(RejectReason::SealSlotTooEarly { ts: header.timestamp, min: min_ts }.into());
            }
            if header.timestamp <= ctx.parent.timestamp {
                return Err(RejectReason::TimestampNotAfterParent.into());
            }

            if !verify_block_signature(signature, &header.pre_seal_hash(), signing_pub) {
                return Err(RejectReason::BadBlockSignature.into());
            }
        }
    }

    debug_assert_eq!(ctx.same_seal_parent.seal_type(), header.seal_type());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bloom, ZERO_HASH};
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    struct AcceptAllPow;
    impl PowValidator for AcceptAllPow {
        fn accepts(&self, _: &[u8; 32], _: u64, _: &[u8], _: u64) -> bool {
            true
        }
    }

    struct RejectAllPow;
    impl PowValidator for RejectAllPow {
        fn accepts(&self, _: &[u8; 32], _: u64, _: &[u8], _: u64) -> bool {
            false
        }
    }

    struct FixedStake(u128);
    impl StakeOracle for FixedStake {
        fn effective_stake(&self, _: &[u8; 32], _: &[u8; 32]) -> Result<u128, StakeOracleError> {
            Ok(self.0)
        }
    }

    fn params() -> ChainParams {
        ChainParams { unity_fork_height: 10, min_difficulty: 16, ..ChainParams::default() }
    }

    fn mining_header(height: u64, timestamp: u64, difficulty: u64) -> BlockHeader {
        BlockHeader {
            parent_hash: ZERO_HASH,
            height,
            timestamp,
            coinbase: [1u8; 32],
            extra_data: vec![],
            difficulty,
            tx_root: ZERO_HASH,
            receipts_root: ZERO_HASH,
            log_bloom: Bloom::zero(),
            state_root: ZERO_HASH,
            energy_limit: 15_000_000,
            energy_used: 0,
            seal: SealData::Mining { nonce: 0, solution: vec![] },
        }
    }

    fn staking_header(
        height: u64,
        timestamp: u64,
        difficulty: u64,
        prev_seed: &[u8],
        sk: &SigningKey,
    ) -> BlockHeader {
        let seed = sk.sign(prev_seed).to_bytes().to_vec();
        let mut header = BlockHeader {
            parent_hash: ZERO_HASH,
            height,
            timestamp,
            coinbase: [1u8; 32],
            extra_data: vec![],
            difficulty,
            tx_root: ZERO_HASH,
            receipts_root: ZERO_HASH,
            log_bloom: Bloom::zero(),
            state_root: ZERO_HASH,
            energy_limit: 15_000_000,
            energy_used: 0,
            seal: SealData::Staking {
                seed,
                signing_pub: sk.verifying_key().to_bytes(),
                signature: vec![],
            },
        };
        let signature = sk.sign(&header.pre_seal_hash()).to_bytes().to_vec();
        if let SealData::Staking { signature: slot, .. } = &mut header.seal {
            *slot = signature;
        }
        header
    }

    #[test]
    fn valid_mining_header_passes() {
        let p = params();
        let grandparent = mining_header(1, 1000, 1000);
        let parent = mining_header(2, 1000 + p.target_seal_spacing_secs, 1000);
        let header = mining_header(3, parent.timestamp + 10, 1000);
        let ctx = HeaderContext {
            parent: &parent,
            same_seal_parent: &parent,
            same_seal_grandparent: Some(&grandparent),
            now: header.timestamp,
        };
        validate_header(&header, &ctx, &p, &AcceptAllPow, &FixedStake(0)).expect("valid header");
    }

    #[test]
    fn future_timestamp_rejected() {
        let p = params();
        let parent = mining_header(2, 1000, 1000);
        let header = mining_header(3, 5000, 1000);
        let ctx = HeaderContext {
            parent: &parent,
            same_seal_parent: &parent,
            same_seal_grandparent: None,
            now: 1000,
        };
        let err = validate_header(&header, &ctx, &p, &AcceptAllPow, &FixedStake(0)).unwrap_err();
        assert!(matches!(
            err,
            HeaderError::Rejected(RejectReason::FutureTimestamp { .. })
        ));
    }

    #[test]
    fn oversized_extra_data_rejected() {
        let p = params();
        let parent = mining_header(2, 1000, 1000);
        let mut header = mining_header(3, 1010, 1000);
        header.extra_data = vec![0u8; 33];
        let ctx = HeaderContext {
            parent: &parent,
            same_seal_parent: &parent,
            same_seal_grandparent: None,
            now: 1010,
        };
        let err = validate_header(&header, &ctx, &p, &AcceptAllPow, &FixedStake(0)).unwrap_err();
        assert!(matches!(err, HeaderError::Rejected(RejectReason::ExtraDataTooLong(33))));
    }

    #[test]
    fn wrong_declared_difficulty_rejected() {
        let p = params();
        let parent = mining_header(2, 1000, 1000);
        let header = mining_header(3, 1010, 999_999);
        let ctx = HeaderContext {
            parent: &parent,
            same_seal_parent: &parent,
            same_seal_grandparent: None,
            now: 1010,
        };
        let err = validate_header(&header, &ctx, &p, &AcceptAllPow, &FixedStake(0)).unwrap_err();
        assert!(matches!(
            err,
            HeaderError::Rejected(RejectReason::DifficultyMismatch { .. })
        ));
    }

    #[test]
    fn pow_rejection_fails_header() {
        let p = params();
        let parent = mining_header(2, 1000, 1000);
        let header = mining_header(3, 1010, 1000);
        let ctx = HeaderContext {
            parent: &parent,
            same_seal_parent: &parent,
            same_seal_grandparent: None,
            now: 1010,
        };
        let err = validate_header(&header, &ctx, &p, &RejectAllPow, &FixedStake(0)).unwrap_err();
        assert!(matches!(err, HeaderError::Rejected(RejectReason::PowRejected)));
    }

    #[test]
    fn energy_limit_jump_rejected() {
        let p = params();
        let parent = mining_header(2, 1000, 1000);
        let mut header = mining_header(3, 1010, 1000);
        header.energy_limit = parent.energy_limit * 2;
        let ctx = HeaderContext {
            parent: &parent,
            same_seal_parent: &parent,
            same_seal_grandparent: None,
            now: 1010,
        };
        let err = validate_header(&header, &ctx, &p, &AcceptAllPow, &FixedStake(0)).unwrap_err();
        assert!(matches!(
            err,
            HeaderError::Rejected(RejectReason::EnergyLimitOutOfBounds { .. })
        ));
    }

    #[test]
    fn staking_below_fork_always_rejected() {
        let p = params();
        let sk = SigningKey::generate(&mut OsRng);
        let prev_seed = vec![3u8; 64];
        let staking_parent = staking_header(4, 900, 2000, &[2u8; 64], &sk);
        let parent = mining_header(5, 1000, 1000);
        let header = staking_header(6, 5000, 2000, &prev_seed, &sk);
        let ctx = HeaderContext {
            parent: &parent,
            same_seal_parent: &staking_parent,
            same_seal_grandparent: None,
            now: 5000,
        };
        let err = validate_header(&header, &ctx, &p, &AcceptAllPow, &FixedStake(100)).unwrap_err();
        assert!(matches!(
            err,
            HeaderError::Rejected(RejectReason::StakingBeforeFork { height: 6, fork: 10 })
        ));
    }

    #[test]
    fn staking_with_zero_stake_rejected() {
        let p = params();
        let sk = SigningKey::generate(&mut OsRng);
        let staking_parent = staking_header(10, 900, 2000, &[2u8; 64], &sk);
        let parent = mining_header(11, 1000, 1000);
        let prev_seed = match &staking_parent.seal {
            SealData::Staking { seed, .. } => seed.clone(),
            _ => unreachable!(),
        };
        let header = staking_header(12, 5000, 2000, &prev_seed, &sk);
        let ctx = HeaderContext {
            parent: &parent,
            same_seal_parent: &staking_parent,
            same_seal_grandparent: None,
            now: 5000,
        };
        let err = validate_header(&header, &ctx, &p, &AcceptAllPow, &FixedStake(0)).unwrap_err();
        assert!(matches!(err, HeaderError::Rejected(RejectReason::ZeroStake)));
    }

    #[test]
    fn staking_seed_must_chain() {
        let p = params();
        let sk = SigningKey::generate(&mut OsRng);
        let staking_parent = staking_header(10, 900, 2000, &[2u8; 64], &sk);
        let parent = mining_header(11, 1000, 1000);
        // seed signs the wrong previous seed
        let header = staking_header(12, 5000, 2000, &[9u8; 64], &sk);
        let ctx = HeaderContext {
            parent: &parent,
            same_seal_parent: &staking_parent,
            same_seal_grandparent: None,
            now: 5000,
        };
        let err = validate_header(&header, &ctx, &p, &AcceptAllPow, &FixedStake(100)).unwrap_err();
        assert!(matches!(err, HeaderError::Rejected(RejectReason::BadSeed)));
    }

    #[test]
    fn staking_too_early_rejected() {
        let p = params();
        let sk = SigningKey::generate(&mut OsRng);
        let staking_parent = staking_header(10, 900, 2_000_000_000, &[2u8; 64], &sk);
        let parent = mining_header(11, 901, 1000);
        let prev_seed = match &staking_parent.seal {
            SealData::Staking { seed, .. } => seed.clone(),
            _ => unreachable!(),
        };
        // tiny stake + huge difficulty makes the minimum wait enormous
        let header = staking_header(12, 902, 2_000_000_000, &prev_seed, &sk);
        let ctx = HeaderContext {
            parent: &parent,
            same_seal_parent: &staking_parent,
            same_seal_grandparent: Some(&staking_parent),
            now: 902,
        };
        // declared difficulty must match policy for the slot check to be
        // reached, so reuse the parent difficulty (no-grandparent style)
        let expected =
            next_difficulty(SealType::Staking, &staking_parent, Some(&staking_parent), &p);
        let mut header = header;
        header.difficulty = expected;
        let err = validate_header(&header, &ctx, &p, &AcceptAllPow, &FixedStake(1)).unwrap_err();
        assert!(matches!(
            err,
            HeaderError::Rejected(RejectReason::SealSlotTooEarly { .. })
        ));
    }

    #[test]
    fn oracle_fault_is_fatal_not_reject() {
        struct FaultyOracle;
        impl StakeOracle for FaultyOracle {
            fn effective_stake(&self, _: &[u8; 32], _: &[u8; 32]) -> Result<u128, StakeOracleError> {
                Err(StakeOracleError::Fatal("staking ledger unreachable".into()))
            }
        }
        let p = params();
        let sk = SigningKey::generate(&mut OsRng);
        let staking_parent = staking_header(10, 900, 2000, &[2u8; 64], &sk);
        let parent = mining_header(11, 1000, 1000);
        let prev_seed = match &staking_parent.seal {
            SealData::Staking { seed, .. } => seed.clone(),
            _ => unreachable!(),
        };
        let header = staking_header(12, 5000, 2000, &prev_seed, &sk);
        let ctx = HeaderContext {
            parent: &parent,
            same_seal_parent: &staking_parent,
            same_seal_grandparent: None,
            now: 5000,
        };
        let err = validate_header(&header, &ctx, &p, &AcceptAllPow, &FaultyOracle).unwrap_err();
        assert!(matches!(err, HeaderError::Fatal(_)));
    }
}
