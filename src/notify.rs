//! Best-effort notification sink.
//!
//! The kernel hands every committed block summary to the sink and announces
//! new best blocks; sink failures are logged by the caller and never affect
//! the import result.

use anyhow::Result;
use tracing::info;

use crate::types::{short_hex, Block, BlockSummary};

pub trait NotificationSink: Send + Sync {
    /// A block was committed (best or side).
    fn block_connected(&self, summary: &BlockSummary) -> Result<()>;

    /// The published best block changed.
    fn new_best(&self, block: &Block) -> Result<()>;
}

/// Default sink: structured log lines only.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn block_connected(&self, summary: &BlockSummary) -> Result<()> {
        info!(
            height = summary.block.height(),
            hash = %short_hex(&summary.block.hash()),
            txs = summary.receipts.len(),
            "block connected"
        );
        Ok(())
    }

    fn new_best(&self, block: &Block) -> Result<()> {
        info!(
            height = block.height(),
            hash = %short_hex(&block.hash()),
            seal = %block.seal_type(),
            "new best block"
        );
        Ok(())
    }
}
