//! Chain parameters, loaded once from `TANDEM_*` environment variables with
//! hardcoded defaults. Everything consensus-critical lives here so tests can
//! build a chain with explicit values instead of env state.

use crate::types::Address;
use std::env;

pub const TANDEM_NETWORK_ID: u32 = 412;

/// Consensus and runtime parameters.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub network_id: u32,
    /// Height at which staking-sealed blocks (and delegation transactions)
    /// activate. Staking blocks below this height are always invalid.
    pub unity_fork_height: u64,
    /// Accept timestamps up to this many seconds ahead of the local clock.
    pub clock_drift_secs: u64,
    /// Target spacing for each seal chain. Seals alternate, so this is twice
    /// the overall block spacing.
    pub target_seal_spacing_secs: u64,
    /// Bound divisor for the per-block difficulty step.
    pub difficulty_bound_divisor: u64,
    pub min_difficulty: u64,
    pub genesis_mining_difficulty: u64,
    pub genesis_staking_difficulty: u64,
    /// Energy limit may move by at most parent_limit / divisor per block.
    pub energy_limit_divisor: u64,
    pub min_energy_limit: u64,
    /// Energy limit templates drift toward.
    pub block_energy_target: u64,
    pub genesis_energy_limit: u64,
    /// Mining reward ramps linearly from `reward_start` to `reward_full`
    /// over the first `reward_ramp_blocks` blocks.
    pub reward_start: u128,
    pub reward_full: u128,
    pub reward_ramp_blocks: u64,
    /// Flat per-block reward once the fork is active, derived offline from
    /// the initial supply and the target issuance rate.
    pub stake_era_reward: u128,
    pub initial_supply: u128,
    /// Coinbase and extra data stamped into locally built templates.
    pub miner_coinbase: Address,
    pub miner_extra_data: Vec<u8>,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            network_id: TANDEM_NETWORK_ID,
            unity_fork_height: 1_920_000,
            clock_drift_secs: 60,
            target_seal_spacing_secs: 20,
            difficulty_bound_divisor: 2048,
            min_difficulty: 16,
            genesis_mining_difficulty: 16,
            genesis_staking_difficulty: 2_000,
            energy_limit_divisor: 1024,
            min_energy_limit: 1_000_000,
            block_energy_target: 15_000_000,
            genesis_energy_limit: 15_000_000,
            reward_start: 748_994_641_621_655_092,
            reward_full: 1_497_989_283_243_310_185,
            reward_ramp_blocks: 259_200,
            // initial_supply * 1% / blocks_per_year at 10s spacing
            stake_era_reward: 1_486_316_774_354_277_437,
            initial_supply: 465_934_586_660_000_000_000_000_000,
            miner_coinbase: [0u8; 32],
            miner_extra_data: b"tandem".to_vec(),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u128(key: &str, default: u128) -> u128 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Load parameters from the environment, falling back to defaults.
pub fn load_params() -> ChainParams {
    let defaults = ChainParams::default();
    let miner_coinbase = env::var("TANDEM_COINBASE")
        .ok()
        .and_then(|s| hex::decode(s.trim_start_matches("0x")).ok())
        .and_then(|b| <[u8; 32]>::try_from(b.as_slice()).ok())
        .unwrap_or(defaults.miner_coinbase);
    let miner_extra_data = env::var("TANDEM_EXTRA_DATA")
        .map(|s| s.into_bytes())
        .unwrap_or_else(|_| defaults.miner_extra_data.clone());

    ChainParams {
        network_id: env_u64("TANDEM_NETWORK_ID", defaults.network_id as u64) as u32,
        unity_fork_height: env_u64("TANDEM_UNITY_FORK_HEIGHT", defaults.unity_fork_height),
        clock_drift_secs: env_u64("TANDEM_CLOCK_DRIFT_SECS", defaults.clock_drift_secs),
        target_seal_spacing_secs: env_u64(
            "TANDEM_SEAL_SPACING_SECS",
            defaults.target_seal_spacing_secs,
        ),
        difficulty_bound_divisor: env_u64(
            "TANDEM_DIFFICULTY_BOUND_DIVISOR",
            defaults.difficulty_bound_divisor,
        ),
        min_difficulty: env_u64("TANDEM_MIN_DIFFICULTY", defaults.min_difficulty),
        genesis_mining_difficulty: defaults.genesis_mining_difficulty,
        genesis_staking_difficulty: defaults.genesis_staking_difficulty,
        energy_limit_divisor: env_u64("TANDEM_ENERGY_LIMIT_DIVISOR", defaults.energy_limit_divisor),
        min_energy_limit: env_u64("TANDEM_MIN_ENERGY_LIMIT", defaults.min_energy_limit),
        block_energy_target: env_u64("TANDEM_BLOCK_ENERGY_TARGET", defaults.block_energy_target),
        genesis_energy_limit: defaults.genesis_energy_limit,
        reward_start: env_u128("TANDEM_REWARD_START", defaults.reward_start),
        reward_full: env_u128("TANDEM_REWARD_FULL", defaults.reward_full),
        reward_ramp_blocks: env_u64("TANDEM_REWARD_RAMP_BLOCKS", defaults.reward_ramp_blocks),
        stake_era_reward: env_u128("TANDEM_STAKE_ERA_REWARD", defaults.stake_era_reward),
        initial_supply: defaults.initial_supply,
        miner_coinbase,
        miner_extra_data,
    }
}

/// Next energy limit for a locally built template: drift toward the target
/// by at most the per-block bound.
pub fn next_energy_limit(parent_limit: u64, params: &ChainParams) -> u64 {
    let max_step = parent_limit / params.energy_limit_divisor;
    let target = params.block_energy_target;
    let next = if parent_limit < target {
        parent_limit.saturating_add(max_step).min(target)
    } else {
        parent_limit.saturating_sub(max_step).max(target)
    };
    next.max(params.min_energy_limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_limit_drifts_toward_target() {
        let params = ChainParams::default();
        let low = params.block_energy_target / 2;
        let next = next_energy_limit(low, &params);
        assert!(next > low);
        assert!(next - low <= low / params.energy_limit_divisor);

        let high = params.block_energy_target * 2;
        let next = next_energy_limit(high, &params);
        assert!(next < high);
    }

    #[test]
    fn energy_limit_stays_at_target() {
        let params = ChainParams::default();
        assert_eq!(
            next_energy_limit(params.block_energy_target, &params),
            params.block_energy_target
        );
    }

    #[test]
    fn energy_limit_honors_floor() {
        let params = ChainParams::default();
        assert!(next_energy_limit(1, &params) >= params.min_energy_limit);
    }
}
