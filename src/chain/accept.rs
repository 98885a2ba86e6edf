//! Block acceptance module - single-track import for all blocks.
//!
//! Every candidate (from sync, gossip relay, or a locally sealed template)
//! goes through [`try_connect`]. The state machine: existence check →
//! timestamp check → direct extend | speculative fork evaluation | no
//! parent, then commit or reject. A fork is evaluated inside a snapshot
//! frame and wins only on a strictly higher combined difficulty score;
//! losing forks leave the canonical chain byte-for-byte untouched.

use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::chain::executor::{execute_block, ExecMode};
use crate::chain::{recovery, state_stack, Chain};
use crate::consensus::body_rules::validate_body;
use crate::consensus::header_rules::{validate_header, HeaderContext, HeaderError};
use crate::exec::ExecutionContext;
use crate::metrics::{
    PROM_TANDEM_IMPORTS, PROM_TANDEM_IMPORT_SECONDS, PROM_TANDEM_REORGS,
    PROM_TANDEM_REORG_DEPTH_TOTAL,
};
use crate::types::{short_hex, Block, BlockSummary, FastImportResult, ImportResult};
use crate::KernelError;

/// Apply and validate a block through the unified acceptance pipeline.
///
/// This is the ONLY function that adds blocks to the chain; `now` is the
/// wall clock in seconds (injected so tests can feed timestamps manually).
pub(crate) fn try_connect(
    chain: &mut Chain,
    block: &Block,
    now: u64,
) -> Result<ImportResult, KernelError> {
    let started = Instant::now();
    let hash = block.hash();

    // 1. existence check, with an opportunistic consistency repair: a
    //    re-submitted block is a free chance to notice state or index
    //    corruption before sync moves on
    if chain.store.max_height() >= block.height() && chain.store.is_block_stored(&hash, block.height())
    {
        debug!(
            height = block.height(),
            hash = %short_hex(&hash),
            "block already exists"
        );
        if !chain.world.is_valid_root(&block.header.state_root) {
            warn!(
                height = block.height(),
                hash = %short_hex(&hash),
                "stored block has no valid world state, repairing"
            );
            recovery::recover_state(chain, block)?;
        }
        if !chain.store.is_indexed(&hash) {
            warn!(
                height = block.height(),
                hash = %short_hex(&hash),
                "stored block has no index entry, repairing"
            );
            recovery::recover_index(chain, block)?;
        }
        record(ImportResult::AlreadyExists, started);
        return Ok(ImportResult::AlreadyExists);
    }

    // 2. clock drift gate
    if block.header.timestamp > now + chain.params.clock_drift_secs {
        debug!(
            height = block.height(),
            ts = block.header.timestamp,
            now,
            "rejected: timestamp beyond drift tolerance"
        );
        record(ImportResult::Invalid, started);
        return Ok(ImportResult::Invalid);
    }

    debug!(
        height = block.height(),
        hash = %short_hex(&hash),
        seal = %block.seal_type(),
        "try connect"
    );

    let ret;
    let summary: Option<BlockSummary>;

    if chain.best_block.is_parent_of(block) {
        // 3. direct extend: run against the live working state, no frame
        let best_root = chain.best_block.header.state_root;
        chain.world.set_root(&best_root)?;

        let hint = match chain.fork_level {
            None => ExecutionContext::MainChain,
            Some(level) => ExecutionContext::SwitchingMainChain(level),
        };
        let was_switching = chain.fork_level.is_some();

        summary = add_to_chain(chain, block, now, hint, false, false)?;
        ret = match summary {
            Some(_) => {
                if was_switching {
                    // recent-fork context is consumed by one committed best
                    chain.fork_level = None;
                }
                ImportResult::ImportedBest
            }
            None => ImportResult::Invalid,
        };
    } else if chain
        .store
        .is_block_stored(&block.header.parent_hash, block.height().saturating_sub(1))
    {
        // 4. known but non-canonical parent: speculative fork evaluation
        let parent_height = block.height() - 1;
        let hint = if chain.store.is_main_chain(&block.header.parent_hash, parent_height) {
            ExecutionContext::SideChain(parent_height)
        } else {
            // no usable caching context on a deep side chain
            ExecutionContext::DeepSideChain
        };

        let frame = state_stack::push_frame(chain, &block.header.parent_hash)?;
        summary = match add_to_chain(chain, block, now, hint, true, false) {
            Ok(s) => s,
            Err(e) => {
                // fatal faults must not leave the frame open
                state_stack::restore_frame(chain, frame)?;
                return Err(e);
            }
        };

        ret = match summary {
            None => {
                state_stack::restore_frame(chain, frame)?;
                ImportResult::Invalid
            }
            Some(_) => {
                if chain.td.is_heavier_than(frame.saved_td()) {
                    let old_best = frame.saved_best().clone();
                    info!(
                        from_height = old_best.height(),
                        from = %short_hex(&old_best.hash()),
                        to_height = block.height(),
                        to = %short_hex(&hash),
                        "branching: fork outweighs canonical chain"
                    );
                    let fork_level = chain.store.rebranch(block)?;
                    chain.fork_level = Some(fork_level);
                    chain.world.set_root(&block.header.state_root)?;
                    chain.recompute_seal_pointers()?;
                    state_stack::drop_frame(frame);

                    PROM_TANDEM_REORGS.inc();
                    PROM_TANDEM_REORG_DEPTH_TOTAL
                        .inc_by(old_best.height().saturating_sub(fork_level));
                    ImportResult::ImportedBest
                } else {
                    state_stack::restore_frame(chain, frame)?;
                    ImportResult::ImportedSide
                }
            }
        };
    } else {
        // 5. parent unknown: nothing is touched, the caller fetches history
        debug!(
            height = block.height(),
            parent = %short_hex(&block.header.parent_hash),
            "no parent on chain"
        );
        record(ImportResult::NoParent, started);
        return Ok(ImportResult::NoParent);
    }

    // 6. publish: readers see the new head only after commit finished
    if ret == ImportResult::ImportedBest {
        chain.store.set_best_hash(&chain.best_block.hash())?;
        chain.publish_head();
        info!(
            height = chain.best_block.height(),
            hash = %short_hex(&chain.best_block.hash()),
            "head updated"
        );
    }

    if ret.is_successful() {
        if let Some(summary) = &summary {
            chain.notify(summary, ret == ImportResult::ImportedBest);
        }
    }

    record(ret, started);
    Ok(ret)
}

fn record(result: ImportResult, started: Instant) {
    let label = match result {
        ImportResult::ImportedBest => "imported_best",
        ImportResult::ImportedSide => "imported_side",
        ImportResult::AlreadyExists => "already_exists",
        ImportResult::NoParent => "no_parent",
        ImportResult::Invalid => "invalid",
    };
    PROM_TANDEM_IMPORTS.with_label_values(&[label]).inc();
    PROM_TANDEM_IMPORT_SECONDS.observe(started.elapsed().as_secs_f64());
}

/// Validate, execute and persist one block against the working state.
///
/// `fork` marks speculative evaluation (the block is stored off the main
/// chain and the index untouched); `rebuild` is the recovery replay flag
/// (state and per-transaction records are rewritten without advancing the
/// canonical pointers or totals). Returns `None` for any consensus-rule
/// failure, with the working state restored to the pre-attempt root.
pub(crate) fn add_to_chain(
    chain: &mut Chain,
    block: &Block,
    now: u64,
    hint: ExecutionContext,
    fork: bool,
    rebuild: bool,
) -> Result<Option<BlockSummary>, KernelError> {
    let hash = block.hash();

    match validate_block(chain, block, now) {
        Ok(()) => {}
        Err(HeaderError::Fatal(msg)) => return Err(KernelError::Fatal(msg)),
        Err(HeaderError::Rejected(reason)) => {
            warn!(
                height = block.height(),
                hash = %short_hex(&hash),
                %reason,
                "rejected: consensus rule violation"
            );
            return Ok(None);
        }
    }

    // keep chain continuity (recovery replays are exempt)
    if !rebuild && chain.best_block.hash() != block.header.parent_hash {
        error!(height = block.height(), "attempting to add a non-sequential block");
        return Ok(None);
    }

    let orig_root = chain.world.root();

    let Some(outcome) = execute_block(chain, block, ExecMode::Importing, hint)? else {
        // execution failed or a declared root lied; hard-reset the state
        chain.world.set_root(&orig_root)?;
        return Ok(None);
    };

    let new_root = chain.world.flush()?;
    if !rebuild && new_root != block.header.state_root {
        warn!(
            height = block.height(),
            declared = %hex::encode(block.header.state_root),
            computed = %hex::encode(new_root),
            "rejected: state root mismatch"
        );
        chain.world.set_root(&orig_root)?;
        return Ok(None);
    }

    let summary = BlockSummary {
        block: block.clone(),
        rewards: outcome.rewards,
        receipts: outcome.receipts,
        summaries: outcome.summaries,
    };

    if rebuild {
        // recovery path: rewrite derived records only
        chain.store.put_receipts(&hash, &summary.receipts)?;
        chain.store.put_tx_locations(block)?;
        chain.store.flush()?;
        debug!(height = block.height(), hash = %short_hex(&hash), "block rebuilt");
    } else {
        chain.td.accumulate(block.seal_type(), block.header.difficulty);
        chain.store.save(block, &chain.td, !fork)?;
        chain.store.put_receipts(&hash, &summary.receipts)?;
        chain.store.put_tx_locations(block)?;
        chain.store.flush()?;
        chain.set_best(block.clone());
        debug!(
            height = block.height(),
            hash = %short_hex(&hash),
            mining_td = %chain.td.mining,
            staking_td = %chain.td.staking,
            "block saved"
        );
    }

    Ok(Some(summary))
}

/// Header and body rules for a candidate whose parent is already stored.
/// The working state must sit at the parent's declared root so the nonce
/// checks read the right view.
fn validate_block(chain: &Chain, block: &Block, now: u64) -> Result<(), HeaderError> {
    let parent = chain
        .store
        .block_by_hash(&block.header.parent_hash)
        .map_err(|e| HeaderError::Fatal(e.to_string()))?
        .ok_or(HeaderError::Rejected(crate::consensus::RejectReason::NonSequential))?;

    let (same_seal_parent, same_seal_grandparent) = chain
        .seal_ancestry(&block.header.parent_hash, block.seal_type())
        .map_err(|e| HeaderError::Fatal(e.to_string()))?;

    let ctx = HeaderContext {
        parent: &parent.header,
        same_seal_parent: &same_seal_parent.header,
        same_seal_grandparent: same_seal_grandparent.as_ref().map(|b| &b.header),
        now,
    };
    validate_header(&block.header, &ctx, &chain.params, chain.pow.as_ref(), chain.stake.as_ref())?;

    validate_body(block, &chain.params, |addr| chain.world.nonce_of(addr))
        .map_err(HeaderError::Rejected)?;

    Ok(())
}

/// Import a block without validity checks or state creation. Only for
/// trusted pivot-sync blocks whose immediate child is already present; the
/// totals are rebuilt by the index recovery once the chain is complete.
pub(crate) fn try_fast_import(
    chain: &mut Chain,
    block: &Block,
    now: u64,
) -> Result<FastImportResult, KernelError> {
    if block.header.timestamp > now + chain.params.clock_drift_secs {
        debug!(height = block.height(), "fast import rejected: future timestamp");
        return Ok(FastImportResult::Invalid);
    }

    let hash = block.hash();
    if chain.store.is_block_stored(&hash, block.height()) {
        return Ok(FastImportResult::AlreadyKnown);
    }

    // a verified child must vouch for the parent
    match chain.store.block_by_height(block.height() + 1)? {
        Some(child) if child.header.parent_hash == hash => {
            chain.store.save_pivot(block)?;
            debug!(
                height = block.height(),
                hash = %short_hex(&hash),
                child = %short_hex(&child.hash()),
                "fast sync block saved"
            );
            Ok(FastImportResult::Imported)
        }
        _ => Ok(FastImportResult::NoChild),
    }
}
