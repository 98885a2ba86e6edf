//! Block body validation: transaction trie root, per-transaction structural
//! and signature checks, the height-gated transaction kinds and gap-free
//! per-sender nonces against the parent state.
//!
//! Any failure rejects the whole block; there is no partial acceptance.

use rayon::prelude::*;
use std::collections::HashMap;
use tracing::warn;

use crate::config::ChainParams;
use crate::consensus::RejectReason;
use crate::types::{tx_root, Address, Block, Tx, TxKind};

/// Parallel verification only pays off past this many transactions.
const PARALLEL_VERIFY_THRESHOLD: usize = 10;

const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

fn check_tx_shape(tx: &Tx) -> Result<(), RejectReason> {
    if tx.signature.len() != 64 {
        return Err(RejectReason::BadTransaction("signature must be 64 bytes".into()));
    }
    if tx.payload.len() > MAX_PAYLOAD_BYTES {
        return Err(RejectReason::BadTransaction("payload too large".into()));
    }
    if tx.energy_limit == 0 {
        return Err(RejectReason::BadTransaction("zero energy limit".into()));
    }
    if !tx.verify_signature() {
        return Err(RejectReason::BadTransaction("invalid signature".into()));
    }
    Ok(())
}

/// Validate `block`'s body against the nonces visible in the parent state.
///
/// `parent_nonce_of` must answer from the state at the parent's declared
/// root; in-block increments are layered on top so several transactions
/// from one sender chain correctly within the block.
pub fn validate_body(
    block: &Block,
    params: &ChainParams,
    parent_nonce_of: impl Fn(&Address) -> u64,
) -> Result<(), RejectReason> {
    let declared = block.header.tx_root;
    let computed = tx_root(&block.txs);
    if declared != computed {
        warn!(
            height = block.header.height,
            declared = %hex::encode(declared),
            computed = %hex::encode(computed),
            "tx trie root mismatch"
        );
        return Err(RejectReason::TxRootMismatch);
    }

    if block.txs.is_empty() {
        return Ok(());
    }

    // kind gate by height
    for tx in &block.txs {
        if tx.kind == TxKind::Delegation && block.header.height < params.unity_fork_height {
            return Err(RejectReason::TxKindNotActivated);
        }
    }

    // structural + signature checks, parallel for larger bodies
    if block.txs.len() >= PARALLEL_VERIFY_THRESHOLD {
        block.txs.par_iter().try_for_each(check_tx_shape)?;
    } else {
        for tx in &block.txs {
            check_tx_shape(tx)?;
        }
    }

    // gap-free nonces per sender, seeded from the parent state
    let mut nonce_cache: HashMap<Address, u64> = HashMap::new();
    for tx in &block.txs {
        let sender = tx.sender_address();
        let expected = *nonce_cache.entry(sender).or_insert_with(|| parent_nonce_of(&sender));
        if tx.nonce != expected {
            warn!(
                height = block.header.height,
                sender = %hex::encode(&sender[..4]),
                expected,
                got = tx.nonce,
                "nonce gap in block body"
            );
            return Err(RejectReason::NonceGap { expected, got: tx.nonce });
        }
        nonce_cache.insert(sender, expected + 1);
    }

    Ok(())
}
