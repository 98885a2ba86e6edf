//! Crash recovery: backward-then-forward repair of world state and index
//! records after detected corruption.
//!
//! Both walkers follow the same shape: walk the parent chain back from the
//! corrupt block until an ancestor with a verified-good record is found
//! (failing outright if even genesis is bad), then replay forward. The
//! state replay goes through the normal execution pipeline with the rebuild
//! flag, which rewrites derived records but skips canonical-pointer side
//! effects; the index replay re-accumulates difficulty totals and finishes
//! with a fork-choice re-evaluation.

use tracing::{debug, info, warn};

use crate::chain::accept::add_to_chain;
use crate::chain::Chain;
use crate::exec::ExecutionContext;
use crate::metrics::PROM_TANDEM_RECOVERIES;
use crate::now_ts;
use crate::types::{short_hex, Block};
use crate::KernelError;

/// Rebuild the world state for `block`. Returns whether its declared state
/// root is valid afterwards.
pub(crate) fn recover_state(chain: &mut Chain, block: &Block) -> Result<bool, KernelError> {
    info!(
        height = block.height(),
        hash = %short_hex(&block.hash()),
        "pruned or corrupt world state, looking for ancestor with valid state"
    );

    let original_root = chain.world.root();

    // walk back collecting blocks whose state is missing
    let mut dirty: Vec<Block> = vec![block.clone()];
    let mut anchor = block.clone();
    loop {
        let Some(parent) = chain.store.block_by_hash(&anchor.header.parent_hash)? else {
            info!("state rebuild failed: ancestor history incomplete");
            PROM_TANDEM_RECOVERIES.with_label_values(&["state", "failed"]).inc();
            return Ok(false);
        };
        anchor = parent;
        dirty.push(anchor.clone());
        if chain.world.is_valid_root(&anchor.header.state_root) || anchor.height() == 0 {
            break;
        }
    }

    if !chain.world.is_valid_root(&anchor.header.state_root) {
        info!("state rebuild failed: no valid state found down to genesis");
        PROM_TANDEM_RECOVERIES.with_label_values(&["state", "failed"]).inc();
        return Ok(false);
    }

    // the last collected block is the valid anchor itself
    dirty.pop();
    info!(
        height = anchor.height(),
        hash = %short_hex(&anchor.hash()),
        "valid state found, replaying forward"
    );
    chain.world.set_root(&anchor.header.state_root)?;

    let now = now_ts();
    for dirty_block in dirty.iter().rev() {
        debug!(
            height = dirty_block.height(),
            txs = dirty_block.txs.len(),
            "rebuilding block state"
        );
        if add_to_chain(chain, dirty_block, now, ExecutionContext::DeepSideChain, false, true)?
            .is_none()
        {
            warn!(
                height = dirty_block.height(),
                "stored block failed to replay, aborting state rebuild"
            );
            break;
        }
    }

    // put the working state back where the caller left it
    if chain.world.is_valid_root(&original_root) {
        chain.world.set_root(&original_root)?;
    }

    let recovered = chain.world.is_valid_root(&block.header.state_root);
    let outcome = if recovered { "ok" } else { "failed" };
    PROM_TANDEM_RECOVERIES.with_label_values(&["state", outcome]).inc();
    Ok(recovered)
}

/// Rebuild the index difficulty records for `block`'s branch, then
/// re-evaluate fork choice against the canonical chain. Returns whether the
/// block is indexed afterwards.
pub(crate) fn recover_index(chain: &mut Chain, block: &Block) -> Result<bool, KernelError> {
    info!(
        height = block.height(),
        hash = %short_hex(&block.hash()),
        "missing index record, looking for ancestor with valid index"
    );

    let mut dirty: Vec<Block> = vec![block.clone()];
    let mut anchor = block.clone();
    loop {
        let Some(parent) = chain.store.block_by_hash(&anchor.header.parent_hash)? else {
            info!("index rebuild failed: ancestor history incomplete");
            PROM_TANDEM_RECOVERIES.with_label_values(&["index", "failed"]).inc();
            return Ok(false);
        };
        anchor = parent;
        dirty.push(anchor.clone());
        if chain.store.is_indexed(&anchor.hash()) || anchor.height() == 0 {
            break;
        }
    }

    if !chain.store.is_indexed(&anchor.hash()) {
        info!("index rebuild failed: no valid index found down to genesis");
        PROM_TANDEM_RECOVERIES.with_label_values(&["index", "failed"]).inc();
        return Ok(false);
    }

    // correct the stored max height before touching entries
    let max_height = chain
        .store
        .max_height()
        .max(chain.best_block.height())
        .max(block.height());
    chain.store.set_max_height(max_height)?;

    // the anchor carries good totals; accumulate forward from it
    dirty.pop();
    let mut totals = chain
        .store
        .dual_difficulty_of(&anchor.hash())?
        .ok_or_else(|| KernelError::Codec("indexed anchor lost its difficulty record".into()))?;
    info!(
        height = anchor.height(),
        hash = %short_hex(&anchor.hash()),
        "valid index found, rebuilding forward"
    );

    for dirty_block in dirty.iter().rev() {
        totals.accumulate(dirty_block.seal_type(), dirty_block.header.difficulty);
        chain.store.put_dual_difficulty(&dirty_block.hash(), &totals)?;
        debug!(height = dirty_block.height(), "index entry rebuilt");
    }
    chain.store.flush()?;

    if !chain.store.is_indexed(&block.hash()) {
        info!("index rebuild failed");
        PROM_TANDEM_RECOVERIES.with_label_values(&["index", "failed"]).inc();
        return Ok(false);
    }

    // the repaired branch may now outweigh the canonical chain
    if totals.is_heavier_than(&chain.td) {
        info!(
            from_height = chain.best_block.height(),
            to_height = block.height(),
            "branching after index repair"
        );
        if !chain.world.is_valid_root(&block.header.state_root) {
            // the branch needs its state back before it can become canonical
            recover_state(chain, block)?;
        }
        chain.store.rebranch(block)?;
        chain.world.set_root(&block.header.state_root)?;
        chain.td = totals;
        chain.set_working_best(block.clone())?;
        chain.store.set_best_hash(&block.hash())?;
        chain.publish_head();
    } else if chain.best_block.height() > block.height() {
        // if the repaired segment is a prefix of the main chain, restore
        // its main-chain markers
        if let Some(child) = chain.store.block_by_height(block.height() + 1)? {
            if child.header.parent_hash == block.hash() {
                correct_main_chain_markers(chain, block)?;
            }
        }
    }

    PROM_TANDEM_RECOVERIES.with_label_values(&["index", "ok"]).inc();
    Ok(true)
}

/// Re-mark `block` and its ancestors as main chain until an already-marked
/// ancestor is reached.
fn correct_main_chain_markers(chain: &Chain, block: &Block) -> Result<(), KernelError> {
    let mut cursor = block.clone();
    loop {
        chain.store.set_main_status(&cursor.hash(), true)?;
        chain.store.set_index_entry(cursor.height(), &cursor.hash())?;
        if cursor.height() == 0 {
            break;
        }
        match chain.store.block_by_hash(&cursor.header.parent_hash)? {
            Some(parent) if !chain.store.is_main_chain(&parent.hash(), parent.height()) => {
                cursor = parent;
            }
            _ => break,
        }
    }
    chain.store.flush()?;
    Ok(())
}
