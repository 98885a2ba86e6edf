// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Tandem Contributors

//! Genesis construction and the startup self-check that refuses to run on a
//! database whose genesis differs from the one computed from parameters.

use anyhow::{anyhow, Result};

use crate::config::ChainParams;
use crate::types::{Block, BlockHeader, Bloom, Hash, SealData, ZERO_HASH};

/// Fixed genesis timestamp (2024-01-01T00:00:00Z).
pub const GENESIS_TIMESTAMP: u64 = 1_704_067_200;

const STAKING_GENESIS_SEED_TAG: &[u8] = b"tandem/staking-genesis-seed/v1";

/// The mining-sealed genesis block. `state_root` is the root of the premine
/// state, computed by the caller at init.
pub fn mining_genesis(params: &ChainParams, state_root: Hash) -> Block {
    Block {
        header: BlockHeader {
            parent_hash: ZERO_HASH,
            height: 0,
            timestamp: GENESIS_TIMESTAMP,
            coinbase: [0u8; 32],
            extra_data: b"tandem-genesis".to_vec(),
            difficulty: params.genesis_mining_difficulty,
            tx_root: ZERO_HASH,
            receipts_root: ZERO_HASH,
            log_bloom: Bloom::zero(),
            state_root,
            energy_limit: params.genesis_energy_limit,
            energy_used: 0,
            seal: SealData::Mining { nonce: 0, solution: Vec::new() },
        },
        txs: Vec::new(),
    }
}

/// Deterministic seed the first staking block's seed must chain from.
pub fn staking_genesis_seed() -> Vec<u8> {
    let mut seed = vec![0u8; 64];
    let mut reader = blake3::Hasher::new().update(STAKING_GENESIS_SEED_TAG).finalize_xof();
    reader.fill(&mut seed);
    seed
}

/// Synthetic staking-sealed genesis. It is never imported or stored; it
/// stands in as the staking-side ancestor (seed origin, difficulty origin,
/// reference timestamp) until the first real staking block lands.
pub fn synthetic_staking_genesis(params: &ChainParams, mining_genesis: &Block) -> Block {
    Block {
        header: BlockHeader {
            parent_hash: ZERO_HASH,
            height: 0,
            timestamp: mining_genesis.header.timestamp,
            coinbase: [0u8; 32],
            extra_data: Vec::new(),
            difficulty: params.genesis_staking_difficulty,
            tx_root: ZERO_HASH,
            receipts_root: ZERO_HASH,
            log_bloom: Bloom::zero(),
            state_root: mining_genesis.header.state_root,
            energy_limit: params.genesis_energy_limit,
            energy_used: 0,
            seal: SealData::Staking {
                seed: staking_genesis_seed(),
                signing_pub: [0u8; 32],
                signature: Vec::new(),
            },
        },
        txs: Vec::new(),
    }
}

/// Refuse to operate on a store whose recorded genesis differs from the one
/// computed from the configured parameters. Prevents silently continuing a
/// chain that was initialized for a different network or premine.
pub fn check_stored_genesis(stored: &Hash, computed: &Block) -> Result<()> {
    let computed_hash = computed.hash();
    if *stored != computed_hash {
        return Err(anyhow!(
            "genesis hash mismatch: store has {}, parameters produce {} — refusing to start on a foreign chain database",
            hex::encode(stored),
            hex::encode(computed_hash)
        ));
    }
    Ok(())
}
