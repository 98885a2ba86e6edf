//! Per-seal difficulty policy and the dual accumulator that drives fork
//! choice.
//!
//! Each seal chain retargets independently over its own parent/grandparent
//! pair: a bounded per-block step keeps the same-seal spacing near the
//! target without oscillation. The two running totals combine by
//! multiplication into the single fork-choice score.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::config::ChainParams;
use crate::types::{BlockHeader, SealType};

/// Fallback when the chain is too young for a same-seal grandparent: keep
/// the same-seal parent's difficulty unchanged.
fn no_grandparent_difficulty(same_seal_parent: &BlockHeader) -> u64 {
    same_seal_parent.difficulty
}

/// Difficulty for the next block of `seal_type`, computed from the nearest
/// same-seal ancestor and the one above it.
///
/// The step is `parent / divisor * clamp(1 - dt / barrier, -99)` where `dt`
/// is the spacing between the two same-seal ancestors: faster than the
/// barrier raises difficulty, slower lowers it, and a single block can never
/// move it by more than parent / divisor (up) or 99 * parent / divisor
/// (down, for dead-chain recovery).
pub fn next_difficulty(
    seal_type: SealType,
    same_seal_parent: &BlockHeader,
    same_seal_grandparent: Option<&BlockHeader>,
    params: &ChainParams,
) -> u64 {
    debug_assert_eq!(same_seal_parent.seal_type(), seal_type);

    let Some(grandparent) = same_seal_grandparent else {
        return no_grandparent_difficulty(same_seal_parent).max(params.min_difficulty);
    };
    debug_assert_eq!(grandparent.seal_type(), seal_type);

    let parent_diff = same_seal_parent.difficulty as i128;
    let dt = same_seal_parent.timestamp.saturating_sub(grandparent.timestamp) as i128;
    let barrier = params.target_seal_spacing_secs.max(1) as i128;

    let sign = (1 - dt / barrier).max(-99);
    let step = parent_diff / params.difficulty_bound_divisor.max(1) as i128;
    let next = parent_diff + step * sign;

    next.clamp(params.min_difficulty as i128, u64::MAX as i128) as u64
}

/// The pair of running difficulty totals along one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DualDifficulty {
    pub mining: U256,
    pub staking: U256,
}

impl DualDifficulty {
    pub fn zero() -> DualDifficulty {
        DualDifficulty { mining: U256::zero(), staking: U256::zero() }
    }

    /// Totals at genesis: the mining genesis difficulty on one side, the
    /// synthetic staking genesis difficulty on the other, so the combined
    /// score is non-zero from the first block.
    pub fn genesis(params: &ChainParams) -> DualDifficulty {
        DualDifficulty {
            mining: U256::from(params.genesis_mining_difficulty),
            staking: U256::from(params.genesis_staking_difficulty),
        }
    }

    /// Add one block's own difficulty to the accumulator matching its seal.
    pub fn accumulate(&mut self, seal_type: SealType, difficulty: u64) {
        match seal_type {
            SealType::Mining => self.mining = self.mining.saturating_add(U256::from(difficulty)),
            SealType::Staking => self.staking = self.staking.saturating_add(U256::from(difficulty)),
        }
    }

    /// The fork-choice comparator: the product of the two totals.
    pub fn combined(&self) -> U256 {
        self.mining.checked_mul(self.staking).unwrap_or(U256::MAX)
    }

    pub fn is_heavier_than(&self, other: &DualDifficulty) -> bool {
        self.combined() > other.combined()
    }
}
