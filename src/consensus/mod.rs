//! Consensus rules: difficulty/reward policy, seal-dispatched header rules,
//! body rules and staking primitives.

pub mod body_rules;
pub mod difficulty;
pub mod header_rules;
pub mod reward;
pub mod staking;

use thiserror::Error;

pub use difficulty::{next_difficulty, DualDifficulty};
pub use header_rules::{validate_header, HeaderContext, HeaderError};
pub use reward::block_reward;
pub use staking::{stake_delta_secs, StakeOracle, StakeOracleError};

/// Why a candidate block was rejected. Every variant is a recoverable
/// consensus-rule violation — the block is refused, nothing else changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("timestamp {ts} exceeds local clock + drift ({limit})")]
    FutureTimestamp { ts: u64, limit: u64 },
    #[error("timestamp not after parent")]
    TimestampNotAfterParent,
    #[error("height {got} does not follow parent height {parent}")]
    WrongHeight { got: u64, parent: u64 },
    #[error("extra data is {0} bytes, limit 32")]
    ExtraDataTooLong(usize),
    #[error("declared difficulty {declared} != expected {expected}")]
    DifficultyMismatch { declared: u64, expected: u64 },
    #[error("proof-of-work solution rejected")]
    PowRejected,
    #[error("energy limit {limit} out of bounds for parent limit {parent}")]
    EnergyLimitOutOfBounds { limit: u64, parent: u64 },
    #[error("staking seal at height {height} before fork activation {fork}")]
    StakingBeforeFork { height: u64, fork: u64 },
    #[error("signer has no effective stake")]
    ZeroStake,
    #[error("timestamp {ts} earlier than stake-weighted slot {min}")]
    SealSlotTooEarly { ts: u64, min: u64 },
    #[error("seed does not chain from previous staking seed")]
    BadSeed,
    #[error("staking block signature invalid")]
    BadBlockSignature,
    #[error("transaction trie root mismatch")]
    TxRootMismatch,
    #[error("invalid transaction: {0}")]
    BadTransaction(String),
    #[error("transaction kind not active at this height")]
    TxKindNotActivated,
    #[error("nonce {got} for sender, expected {expected}")]
    NonceGap { expected: u64, got: u64 },
    #[error("receipts trie root mismatch")]
    ReceiptsRootMismatch,
    #[error("log bloom mismatch")]
    BloomMismatch,
    #[error("post-execution state root mismatch")]
    StateRootMismatch,
    #[error("execution engine rejected a sealed transaction")]
    RejectedTransaction,
    #[error("block does not extend the working chain")]
    NonSequential,
}
