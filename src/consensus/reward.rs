//! Block reward schedule.
//!
//! Before the unity fork the mining reward ramps linearly from
//! `reward_start` to `reward_full` over the ramp window, then stays flat.
//! From the fork onward every block (either seal) earns the flat stake-era
//! reward derived from the initial supply.

use crate::config::ChainParams;

pub fn block_reward(height: u64, params: &ChainParams) -> u128 {
    if height >= params.unity_fork_height {
        return params.stake_era_reward;
    }
    if height >= params.reward_ramp_blocks {
        return params.reward_full;
    }
    let span = params.reward_full.saturating_sub(params.reward_start);
    params.reward_start + span * height as u128 / params.reward_ramp_blocks.max(1) as u128
}
