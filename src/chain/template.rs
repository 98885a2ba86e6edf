//! Block template builder.
//!
//! Templates are produced by speculative execution inside a snapshot frame
//! that is always restored: the builder fills in state root, receipts root,
//! log bloom and energy used, and the frame guarantees the working chain is
//! untouched afterwards. Staking templates built for an external signer are
//! cached by pre-seal hash so the signer can finalize with just a
//! signature.

use ed25519_dalek::{Signer, SigningKey};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::executor::{execute_block, ExecMode};
use crate::chain::{state_stack, Chain};
use crate::config::next_energy_limit;
use crate::consensus::difficulty::next_difficulty;
use crate::consensus::staking::{stake_delta_secs, verify_block_signature, verify_seed_chain};
use crate::exec::ExecutionContext;
use crate::metrics::PROM_TANDEM_TEMPLATES;
use crate::now_ts;
use crate::types::{
    address_of, short_hex, tx_root, Block, BlockHeader, Bloom, Hash, SealData, SealType, Tx,
    ZERO_HASH,
};
use crate::KernelError;

/// Coarse polling interval while waiting for the wall clock to reach the
/// template timestamp.
const BLOCK_TIME_POLL_MS: u64 = 500;

/// Build a mining template on `parent`. With `wait_for_block_time` the call
/// sleeps until the wall clock passes the chosen timestamp (the host may
/// interrupt the thread; the template is returned either way).
pub(crate) fn build_mining_template(
    chain: &mut Chain,
    parent: &Block,
    txs: Vec<Tx>,
    wait_for_block_time: bool,
) -> Result<Block, KernelError> {
    let mut time = now_ts();
    if parent.header.timestamp >= time {
        time = parent.header.timestamp + 1;
        while wait_for_block_time && now_ts() <= time {
            thread::sleep(Duration::from_millis(BLOCK_TIME_POLL_MS));
        }
    }

    let (same_seal_parent, same_seal_grandparent) =
        chain.seal_ancestry(&parent.hash(), SealType::Mining)?;
    let difficulty = next_difficulty(
        SealType::Mining,
        &same_seal_parent.header,
        same_seal_grandparent.as_ref().map(|b| &b.header),
        &chain.params,
    );

    let mut draft = Block {
        header: BlockHeader {
            parent_hash: parent.hash(),
            height: parent.height() + 1,
            timestamp: time,
            coinbase: chain.params.miner_coinbase,
            extra_data: chain.params.miner_extra_data.clone(),
            difficulty,
            tx_root: ZERO_HASH,
            receipts_root: ZERO_HASH,
            log_bloom: Bloom::zero(),
            state_root: ZERO_HASH,
            energy_limit: next_energy_limit(parent.header.energy_limit, &chain.params),
            energy_used: 0,
            seal: SealData::Mining { nonce: 0, solution: Vec::new() },
        },
        txs,
    };

    fill_by_speculative_execution(chain, &mut draft)?;
    PROM_TANDEM_TEMPLATES.with_label_values(&["mining"]).inc();
    debug!(
        height = draft.height(),
        txs = draft.txs.len(),
        difficulty,
        "mining template built"
    );
    Ok(draft)
}

/// Build a staking template on `parent`, or `None` when the fork is not yet
/// active, the seed does not chain, or the signer has no stake. With a
/// local signing key the block comes back sealed; without one the unsigned
/// template is cached under its pre-seal hash for an external signer.
pub(crate) fn build_staking_template(
    chain: &mut Chain,
    parent: &Block,
    txs: Vec<Tx>,
    seed: Vec<u8>,
    signing_pub: [u8; 32],
    signing_key: Option<&SigningKey>,
) -> Result<Option<Block>, KernelError> {
    let height = parent.height() + 1;
    if height < chain.params.unity_fork_height {
        debug!(height, fork = chain.params.unity_fork_height, "staking not yet active");
        return Ok(None);
    }

    let (prev_staking, prev_prev_staking) = chain.seal_ancestry(&parent.hash(), SealType::Staking)?;
    let SealData::Staking { seed: prev_seed, .. } = &prev_staking.header.seal else {
        return Ok(None);
    };
    if !verify_seed_chain(&seed, prev_seed, &signing_pub) {
        warn!(height, "staking template refused: seed does not chain");
        return Ok(None);
    }

    let signer = address_of(&signing_pub);
    let stake = chain
        .stake
        .effective_stake(&signer, &chain.params.miner_coinbase)
        .map_err(|e| KernelError::Fatal(e.to_string()))?;
    if stake == 0 {
        debug!(height, signer = %short_hex(&signer), "staking template refused: no stake");
        return Ok(None);
    }

    let difficulty = next_difficulty(
        SealType::Staking,
        &prev_staking.header,
        prev_prev_staking.as_ref().map(|b| &b.header),
        &chain.params,
    );
    let delta = stake_delta_secs(&seed, difficulty, stake);
    let timestamp = (prev_staking.header.timestamp + delta).max(parent.header.timestamp + 1);

    let mut draft = Block {
        header: BlockHeader {
            parent_hash: parent.hash(),
            height,
            timestamp,
            coinbase: chain.params.miner_coinbase,
            extra_data: chain.params.miner_extra_data.clone(),
            difficulty,
            tx_root: ZERO_HASH,
            receipts_root: ZERO_HASH,
            log_bloom: Bloom::zero(),
            state_root: ZERO_HASH,
            energy_limit: next_energy_limit(parent.header.energy_limit, &chain.params),
            energy_used: 0,
            seal: SealData::Staking { seed, signing_pub, signature: Vec::new() },
        },
        txs,
    };

    fill_by_speculative_execution(chain, &mut draft)?;
    PROM_TANDEM_TEMPLATES.with_label_values(&["staking"]).inc();

    let pre_seal = draft.header.pre_seal_hash();
    if let Some(sk) = signing_key {
        let signature = sk.sign(&pre_seal).to_bytes().to_vec();
        if let SealData::Staking { signature: slot, .. } = &mut draft.header.seal {
            *slot = signature;
        }
        debug!(height, "staking template built and sealed locally");
        Ok(Some(draft))
    } else {
        chain.staking_templates.insert(pre_seal, draft.clone());
        info!(
            height,
            pre_seal = %short_hex(&pre_seal),
            "staking template cached for external signer"
        );
        Ok(Some(draft))
    }
}

/// Finalize a cached staking template with an externally produced
/// signature. Returns the sealed block ready for `import`.
pub(crate) fn seal_staking_template(
    chain: &Chain,
    pre_seal_hash: &Hash,
    signature: Vec<u8>,
) -> Option<Block> {
    let (_, mut block) = chain.staking_templates.remove(pre_seal_hash)?;
    let SealData::Staking { signing_pub, .. } = &block.header.seal else {
        return None;
    };
    let signing_pub = *signing_pub;
    if !verify_block_signature(&signature, pre_seal_hash, &signing_pub) {
        warn!(pre_seal = %short_hex(pre_seal_hash), "external signature does not verify");
        return None;
    }
    if let SealData::Staking { signature: slot, .. } = &mut block.header.seal {
        *slot = signature;
    }
    Some(block)
}

/// Execute the draft in `Building` mode inside a frame and fill in the
/// derived header fields. The frame is restored on every path, so template
/// building never moves the canonical chain.
fn fill_by_speculative_execution(chain: &mut Chain, draft: &mut Block) -> Result<(), KernelError> {
    let frame = state_stack::push_frame(chain, &draft.header.parent_hash)?;

    let result = execute_block(chain, draft, ExecMode::Building, ExecutionContext::Pending)
        .and_then(|outcome| {
            let outcome =
                outcome.ok_or_else(|| KernelError::Codec("building mode cannot fail".into()))?;
            let state_root = chain.world.flush()?;
            Ok((outcome, state_root))
        });

    state_stack::restore_frame(chain, frame)?;
    let (outcome, state_root) = result?;

    draft.txs = outcome.txs;
    draft.header.tx_root = tx_root(&draft.txs);
    draft.header.receipts_root = crate::types::receipts_root(&outcome.receipts);
    draft.header.log_bloom = crate::types::log_bloom(&outcome.receipts);
    draft.header.state_root = state_root;
    draft.header.energy_used = outcome.energy_used;
    Ok(())
}
