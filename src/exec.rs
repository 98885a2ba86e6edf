//! Transaction-execution collaborator.
//!
//! The kernel never interprets transactions itself; it hands the list plus a
//! tracked state view to a `TransactionExecutor` and consumes the per-
//! transaction summaries. `LedgerExecutor` is the built-in balance/nonce
//! engine used by tests and plain-ledger deployments.

use thiserror::Error;

use crate::state::TrackedState;
use crate::types::{Address, Hash, LogEntry, Receipt, Tx, TxExecSummary, TxKind};

/// Base energy charged per transaction.
pub const BASE_TX_ENERGY: u64 = 21_000;
/// Energy per payload byte.
pub const PAYLOAD_BYTE_ENERGY: u64 = 68;

/// Where a block sits relative to the canonical chain while it executes;
/// forwarded to the executor as a caching hint only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    MainChain,
    /// Right after a re-branch; carries the fork level.
    SwitchingMainChain(u64),
    /// Side-chain block whose parent is on the main chain.
    SideChain(u64),
    /// No usable caching context (deep side chain, recovery rebuild).
    DeepSideChain,
    /// Template building on top of pending state.
    Pending,
}

/// Per-block context handed to the executor.
#[derive(Debug, Clone)]
pub struct BlockContext {
    pub block_hash: Hash,
    pub height: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub difficulty: u64,
    pub energy_limit: u64,
    pub context_hint: ExecutionContext,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Unrecoverable engine fault. The kernel aborts the operation and
    /// surfaces this to the host; it must never be swallowed.
    #[error("fatal execution fault: {0}")]
    Fatal(String),
}

pub trait TransactionExecutor: Send + Sync {
    /// Execute `txs` in order against `state`. Every transaction gets a
    /// summary; unexecutable ones come back with `rejected = true` and no
    /// state effects. When `check_energy_limit` is set, transactions that
    /// would push the running total past `ctx.energy_limit` are rejected
    /// rather than executed.
    fn execute(
        &self,
        txs: &[Tx],
        state: &mut TrackedState<'_>,
        ctx: &BlockContext,
        check_energy_limit: bool,
    ) -> Result<Vec<TxExecSummary>, ExecutorError>;
}

/// Intrinsic energy cost of a transaction.
pub fn intrinsic_energy(tx: &Tx) -> u64 {
    BASE_TX_ENERGY + tx.payload.len() as u64 * PAYLOAD_BYTE_ENERGY
}

/// Built-in plain-ledger executor: transfers and delegations move balances,
/// fees go to the coinbase, nonces advance on every executed transaction.
pub struct LedgerExecutor;

impl LedgerExecutor {
    fn rejected(tx: &Tx, reason: &str) -> TxExecSummary {
        TxExecSummary {
            tx: tx.clone(),
            receipt: Receipt {
                tx_hash: tx.hash(),
                ok: false,
                error: Some(reason.to_string()),
                energy_used: 0,
                logs: vec![],
            },
            rejected: true,
            energy_used: 0,
            fee: 0,
        }
    }
}

impl TransactionExecutor for LedgerExecutor {
    fn execute(
        &self,
        txs: &[Tx],
        state: &mut TrackedState<'_>,
        ctx: &BlockContext,
        check_energy_limit: bool,
    ) -> Result<Vec<TxExecSummary>, ExecutorError> {
        let mut summaries = Vec::with_capacity(txs.len());
        let mut energy_total: u64 = 0;

        for tx in txs {
            let sender = tx.sender_address();
            let cost = intrinsic_energy(tx);

            if tx.energy_limit < cost {
                summaries.push(Self::rejected(tx, "energy limit below intrinsic cost"));
                continue;
            }
            if check_energy_limit && energy_total.saturating_add(cost) > ctx.energy_limit {
                summaries.push(Self::rejected(tx, "block energy limit exhausted"));
                continue;
            }
            if tx.nonce != state.nonce_of(&sender) {
                summaries.push(Self::rejected(tx, "nonce mismatch"));
                continue;
            }
            let fee = cost as u128 * tx.energy_price as u128;
            if state.balance_of(&sender) < tx.amount.saturating_add(fee) {
                summaries.push(Self::rejected(tx, "insufficient balance"));
                continue;
            }

            state.sub_balance(&sender, tx.amount.saturating_add(fee));
            state.add_balance(&tx.to, tx.amount);
            state.add_balance(&ctx.coinbase, fee);
            state.increment_nonce(&sender);
            energy_total += cost;

            let logs = match tx.kind {
                TxKind::Transfer => vec![],
                TxKind::Delegation => vec![LogEntry {
                    address: tx.to,
                    topics: vec![crate::types::blake3_hash(b"delegation"), sender],
                    data: tx.amount.to_be_bytes().to_vec(),
                }],
            };

            summaries.push(TxExecSummary {
                tx: tx.clone(),
                receipt: Receipt {
                    tx_hash: tx.hash(),
                    ok: true,
                    error: None,
                    energy_used: cost,
                    logs,
                },
                rejected: false,
                energy_used: cost,
                fee,
            });
        }

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{StateStore, WorldState};
    use crate::types::address_of;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn world(premine: &[(Address, u128)]) -> WorldState {
        let db = sled::Config::new().temporary(true).open().unwrap();
        WorldState::new(StateStore::open(&db).unwrap(), premine).unwrap()
    }

    fn ctx(energy_limit: u64) -> BlockContext {
        BlockContext {
            block_hash: [0u8; 32],
            height: 1,
            timestamp: 1000,
            coinbase: [0xCC; 32],
            difficulty: 16,
            energy_limit,
            context_hint: ExecutionContext::MainChain,
        }
    }

    fn signed_tx(sk: &SigningKey, nonce: u64, amount: u128, price: u64) -> Tx {
        let mut tx = Tx {
            nonce,
            sender_pub: sk.verifying_key().to_bytes(),
            to: [9u8; 32],
            amount,
            energy_limit: 100_000,
            energy_price: price,
            kind: TxKind::Transfer,
            payload: vec![],
            signature: vec![],
        };
        tx.signature = sk.sign(&tx.signing_bytes()).to_bytes().to_vec();
        tx
    }

    #[test]
    fn transfer_moves_balance_and_pays_fee() {
        let sk = SigningKey::generate(&mut OsRng);
        let sender = address_of(&sk.verifying_key().to_bytes());
        let mut world = world(&[(sender, 1_000_000)]);
        let tx = signed_tx(&sk, 0, 100, 1);
        let ctx = ctx(15_000_000);

        let mut track = world.start_tracking();
        let summaries = LedgerExecutor.execute(&[tx], &mut track, &ctx, false).unwrap();
        track.apply();

        assert_eq!(summaries.len(), 1);
        assert!(!summaries[0].rejected);
        assert_eq!(summaries[0].energy_used, BASE_TX_ENERGY);
        assert_eq!(world.balance_of(&[9u8; 32]), 100);
        assert_eq!(world.balance_of(&ctx.coinbase), BASE_TX_ENERGY as u128);
        assert_eq!(world.nonce_of(&sender), 1);
    }

    #[test]
    fn insufficient_balance_rejects_without_effects() {
        let sk = SigningKey::generate(&mut OsRng);
        let sender = address_of(&sk.verifying_key().to_bytes());
        let mut world = world(&[(sender, 50)]);
        let tx = signed_tx(&sk, 0, 1_000_000, 1);
        let ctx = ctx(15_000_000);

        let mut track = world.start_tracking();
        let summaries = LedgerExecutor.execute(&[tx], &mut track, &ctx, false).unwrap();
        track.apply();

        assert!(summaries[0].rejected);
        assert_eq!(world.balance_of(&sender), 50);
        assert_eq!(world.nonce_of(&sender), 0);
    }

    #[test]
    fn block_energy_limit_enforced_when_asked() {
        let sk = SigningKey::generate(&mut OsRng);
        let sender = address_of(&sk.verifying_key().to_bytes());
        let mut world = world(&[(sender, 10_000_000)]);
        let txs = vec![signed_tx(&sk, 0, 1, 0), signed_tx(&sk, 1, 1, 0)];
        // room for exactly one transaction
        let ctx = ctx(BASE_TX_ENERGY + 1);

        let mut track = world.start_tracking();
        let summaries = LedgerExecutor.execute(&txs, &mut track, &ctx, true).unwrap();
        assert!(!summaries[0].rejected);
        assert!(summaries[1].rejected);

        // without the check both fit
        let mut track = world.start_tracking();
        let summaries = LedgerExecutor.execute(&txs, &mut track, &ctx, false).unwrap();
        assert!(summaries.iter().all(|s| !s.rejected));
    }

    #[test]
    fn delegation_emits_a_log() {
        let sk = SigningKey::generate(&mut OsRng);
        let sender = address_of(&sk.verifying_key().to_bytes());
        let mut world = world(&[(sender, 1_000_000)]);
        let mut tx = signed_tx(&sk, 0, 500, 0);
        tx.kind = TxKind::Delegation;
        tx.signature = sk.sign(&tx.signing_bytes()).to_bytes().to_vec();

        let mut track = world.start_tracking();
        let summaries = LedgerExecutor.execute(&[tx], &mut track, &ctx(15_000_000), false).unwrap();
        assert_eq!(summaries[0].receipt.logs.len(), 1);
        assert!(!summaries[0].receipt.bloom().contains(b"unrelated"));
    }
}
