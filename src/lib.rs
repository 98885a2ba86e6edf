//! tandem-node — block-import and fork-choice kernel for a dual-seal chain.
//!
//! Mining-sealed and staking-sealed blocks interleave into one canonical
//! chain; fork choice is the product of the two difficulty accumulators.
//! The crate is the import engine only: execution, PoW verification, the
//! stake ledger and event delivery are injected collaborators, and
//! networking/mempool/CLI live in the host.
//!
//! Entry points hang off [`chain::Chain`]: `import`, `fast_import`, the
//! template builders and the recovery walkers, all single-writer (`&mut`),
//! plus lock-free read access through the published head view.

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub mod chain;
pub mod config;
pub mod consensus;
pub mod exec;
pub mod genesis;
pub mod metrics;
pub mod notify;
pub mod pow;
pub mod state;
pub mod store;
pub mod types;

pub use chain::{Chain, Collaborators, HeadHandle, HeadView};
pub use config::{load_params, ChainParams};
pub use consensus::{DualDifficulty, RejectReason};
pub use exec::{ExecutionContext, LedgerExecutor, TransactionExecutor};
pub use notify::{LogSink, NotificationSink};
pub use pow::{BlakePowValidator, PowValidator};
pub use types::{
    Block, BlockHeader, BlockSummary, FastImportResult, Hash, ImportResult, Receipt, SealData,
    SealType, Tx, TxKind,
};

/// Faults that abort an operation instead of rejecting a block: storage and
/// codec failures, and fatal collaborator errors. The kernel never
/// terminates the process itself; the host decides what a fatal fault
/// means.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("storage fault: {0}")]
    Store(#[from] sled::Error),
    #[error("codec fault: {0}")]
    Codec(String),
    #[error("state version missing for root {0}")]
    MissingState(String),
    #[error("fatal collaborator fault: {0}")]
    Fatal(String),
}

/// Current unix time in seconds.
pub fn now_ts() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
