//! Snapshot frames for speculative fork evaluation.
//!
//! A frame captures everything the import path mutates (canonical pointers,
//! the dual-difficulty totals, the working state root) and repoints the
//! working state at a fork parent. Exactly one frame exists per fork
//! evaluation and it is always consumed — restored on a losing or invalid
//! fork, dropped once the fork has been made canonical — before the import
//! call returns.

use tracing::debug;

use crate::chain::Chain;
use crate::consensus::DualDifficulty;
use crate::types::{short_hex, Block, Hash};
use crate::KernelError;

/// Saved working state. Must be passed back to [`restore_frame`] or
/// [`drop_frame`]; it cannot be silently forgotten on an early return.
#[must_use = "a chain frame must be restored or dropped before returning"]
pub(crate) struct ChainFrame {
    saved_best: Block,
    saved_best_mining: Block,
    saved_best_staking: Option<Block>,
    saved_td: DualDifficulty,
    saved_root: Hash,
}

impl ChainFrame {
    pub(crate) fn saved_td(&self) -> &DualDifficulty {
        &self.saved_td
    }

    pub(crate) fn saved_best(&self) -> &Block {
        &self.saved_best
    }
}

/// Capture the current canonical pointers and totals, then repoint the
/// working state at `parent_hash` (which must be stored with totals).
pub(crate) fn push_frame(chain: &mut Chain, parent_hash: &Hash) -> Result<ChainFrame, KernelError> {
    let parent = chain
        .store
        .block_by_hash(parent_hash)?
        .ok_or_else(|| KernelError::Codec("frame parent not in block store".into()))?;
    let parent_td = chain
        .store
        .dual_difficulty_of(parent_hash)?
        .ok_or_else(|| KernelError::Codec("frame parent has no difficulty record".into()))?;

    let frame = ChainFrame {
        saved_best: chain.best_block.clone(),
        saved_best_mining: chain.best_mining.clone(),
        saved_best_staking: chain.best_staking.clone(),
        saved_td: chain.td,
        saved_root: chain.world.root(),
    };

    debug!(
        parent = %short_hex(parent_hash),
        parent_height = parent.height(),
        "frame opened for speculative evaluation"
    );

    chain.world.set_root(&parent.header.state_root)?;
    chain.td = parent_td;
    chain.set_working_best(parent)?;
    Ok(frame)
}

/// Restore every captured value, discarding whatever happened while the
/// frame was open.
pub(crate) fn restore_frame(chain: &mut Chain, frame: ChainFrame) -> Result<(), KernelError> {
    chain.world.set_root(&frame.saved_root)?;
    chain.best_block = frame.saved_best;
    chain.best_mining = frame.saved_best_mining;
    chain.best_staking = frame.saved_best_staking;
    chain.td = frame.saved_td;
    debug!("frame restored");
    Ok(())
}

/// Discard the saved values without restoring; the fork's mutations have
/// already been made canonical by the caller.
pub(crate) fn drop_frame(frame: ChainFrame) {
    debug!(old_best = %short_hex(&frame.saved_best.hash()), "frame dropped after re-branch");
}
