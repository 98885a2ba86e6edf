//! Block execution pipeline.
//!
//! Wraps the external execution engine: runs the transaction list against
//! the working state, credits the block reward, and — when importing — holds
//! the block to its declared receipts root and log bloom. The two modes
//! differ only in rejection policy: while building a template a rejected
//! transaction is silently dropped so the template stays sealable; a sealed
//! block must execute exactly as given, so any rejection is a block-level
//! failure.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::chain::Chain;
use crate::consensus::reward::block_reward;
use crate::exec::{BlockContext, ExecutionContext};
use crate::types::{
    log_bloom, receipts_root, short_hex, Address, Block, Receipt, Tx, TxExecSummary,
};
use crate::KernelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Template building: drop rejected transactions, no declared roots yet.
    Building,
    /// Import: any rejection or root mismatch fails the block.
    Importing,
}

/// Everything the caller needs from one executed block.
pub(crate) struct ExecOutcome {
    /// Transactions that actually executed (all of them when importing).
    pub txs: Vec<Tx>,
    pub rewards: BTreeMap<Address, u128>,
    pub receipts: Vec<Receipt>,
    pub summaries: Vec<TxExecSummary>,
    pub energy_used: u64,
}

/// Execute `block` against the current working state. Mutations are applied
/// to the in-memory accounts but not flushed; on `Ok(None)` (import-mode
/// failure) the caller must restore the working state to the pre-attempt
/// root. Fatal executor faults abort with `KernelError::Fatal` before
/// anything is committed.
pub(crate) fn execute_block(
    chain: &mut Chain,
    block: &Block,
    mode: ExecMode,
    hint: ExecutionContext,
) -> Result<Option<ExecOutcome>, KernelError> {
    let ctx = BlockContext {
        block_hash: block.hash(),
        height: block.height(),
        timestamp: block.header.timestamp,
        coinbase: block.header.coinbase,
        difficulty: block.header.difficulty,
        energy_limit: block.header.energy_limit,
        context_hint: hint,
    };

    let executor = chain.executor.clone();
    let check_energy_limit = mode == ExecMode::Building;

    let mut track = chain.world.start_tracking();
    let all_summaries = executor
        .execute(&block.txs, &mut track, &ctx, check_energy_limit)
        .map_err(|e| KernelError::Fatal(e.to_string()))?;

    if mode == ExecMode::Importing {
        if let Some(bad) = all_summaries.iter().find(|s| s.rejected) {
            warn!(
                height = block.height(),
                tx = %short_hex(&bad.receipt.tx_hash),
                reason = bad.receipt.error.as_deref().unwrap_or("unknown"),
                "sealed block carries a rejected transaction"
            );
            track.rollback();
            return Ok(None);
        }
    }

    let mut txs = Vec::new();
    let mut receipts = Vec::new();
    let mut summaries = Vec::new();
    let mut energy_used: u64 = 0;
    for summary in all_summaries {
        if summary.rejected {
            debug!(tx = %short_hex(&summary.receipt.tx_hash), "dropping rejected transaction from template");
            continue;
        }
        energy_used += summary.energy_used;
        txs.push(summary.tx.clone());
        receipts.push(summary.receipt.clone());
        summaries.push(summary);
    }

    // block reward is part of the same state mutation
    let reward = block_reward(block.height(), &chain.params);
    track.add_balance(&block.header.coinbase, reward);
    let mut rewards = BTreeMap::new();
    rewards.insert(block.header.coinbase, reward);

    track.apply();

    if mode == ExecMode::Importing {
        let computed_receipts_root = receipts_root(&receipts);
        if computed_receipts_root != block.header.receipts_root {
            warn!(
                height = block.height(),
                declared = %hex::encode(block.header.receipts_root),
                computed = %hex::encode(computed_receipts_root),
                "receipts root mismatch"
            );
            return Ok(None);
        }
        let computed_bloom = log_bloom(&receipts);
        if computed_bloom != block.header.log_bloom {
            warn!(height = block.height(), "log bloom mismatch");
            return Ok(None);
        }
    }

    Ok(Some(ExecOutcome { txs, rewards, receipts, summaries, energy_used }))
}
