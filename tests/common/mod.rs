//! Shared harness for the kernel integration tests: a temporary chain with
//! trivial difficulties, a funded account and helpers to seal blocks of
//! both types.
#![allow(dead_code)]

use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use tandem_node::consensus::staking::{StakeOracle, StakeOracleError};
use tandem_node::exec::LedgerExecutor;
use tandem_node::genesis::staking_genesis_seed;
use tandem_node::notify::LogSink;
use tandem_node::pow::{mine, BlakePowValidator};
use tandem_node::types::{address_of, Address, Block, SealData, SealType, Tx, TxKind};
use tandem_node::{Chain, ChainParams, Collaborators};

pub const TEST_STAKE: u128 = 1_000_000_000;

/// Every signer holds the same fixed stake.
pub struct FixedStake(pub u128);

impl StakeOracle for FixedStake {
    fn effective_stake(&self, _: &Address, _: &Address) -> Result<u128, StakeOracleError> {
        Ok(self.0)
    }
}

pub fn test_params(fork_height: u64) -> ChainParams {
    ChainParams {
        unity_fork_height: fork_height,
        min_difficulty: 1,
        genesis_mining_difficulty: 1,
        genesis_staking_difficulty: 10,
        clock_drift_secs: 60,
        ..ChainParams::default()
    }
}

pub fn funded_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn collaborators(stake: u128) -> Collaborators {
    Collaborators {
        executor: Arc::new(LedgerExecutor),
        pow: Arc::new(BlakePowValidator),
        stake: Arc::new(FixedStake(stake)),
        sink: Arc::new(LogSink),
    }
}

static TRACING: std::sync::Once = std::sync::Once::new();

/// Route kernel logs through `RUST_LOG` when a test needs them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Fresh chain over a temporary database, premining `funded` accounts.
pub fn new_chain(params: &ChainParams, premine: &[(Address, u128)]) -> Chain {
    init_tracing();
    let db = sled::Config::new().temporary(true).open().expect("open temp db");
    Chain::with_db(db, params.clone(), collaborators(TEST_STAKE), premine).expect("open chain")
}

/// Solve the template's PoW and return the sealed block.
pub fn seal_mining(mut template: Block) -> Block {
    let difficulty = template.header.difficulty;
    let nonce =
        mine(&template.header.pre_seal_hash(), difficulty, 10_000_000).expect("pow solvable");
    template.header.seal = SealData::Mining { nonce, solution: Vec::new() };
    template
}

/// Build and seal a mining block on `parent`.
pub fn mine_on(chain: &mut Chain, parent: &Block, txs: Vec<Tx>) -> Block {
    let template = chain.build_mining_template(parent, txs, false).expect("build template");
    seal_mining(template)
}

/// Build and seal a mining block on the current best.
pub fn mine_on_best(chain: &mut Chain) -> Block {
    let best = chain.best_block();
    mine_on(chain, &best, vec![])
}

/// Like `mine_on`, but stamped with distinct extra data so two variants on
/// one parent never collide on the same hash.
pub fn mine_variant(chain: &mut Chain, parent: &Block, tag: u8) -> Block {
    let mut template = chain.build_mining_template(parent, vec![], false).expect("build template");
    template.header.extra_data = vec![tag];
    seal_mining(template)
}

/// Seed the staker must use for a block whose parent is `parent`.
pub fn next_seed(chain: &Chain, parent: &Block, sk: &SigningKey) -> Vec<u8> {
    let mut cursor = Some(parent.clone());
    let prev_seed = loop {
        match cursor {
            Some(block) => {
                if let SealData::Staking { seed, .. } = &block.header.seal {
                    break seed.clone();
                }
                cursor = chain.block_by_hash(&block.header.parent_hash).expect("store read");
            }
            None => break staking_genesis_seed(),
        }
    };
    sk.sign(&prev_seed).to_bytes().to_vec()
}

/// Build and locally seal a staking block on `parent`.
pub fn stake_on(chain: &mut Chain, parent: &Block, sk: &SigningKey, txs: Vec<Tx>) -> Option<Block> {
    let seed = next_seed(chain, parent, sk);
    chain
        .build_staking_template(parent, txs, seed, sk.verifying_key().to_bytes(), Some(sk))
        .expect("build staking template")
}

/// Signed transfer from `sk`.
pub fn transfer(sk: &SigningKey, nonce: u64, to: Address, amount: u128) -> Tx {
    let mut tx = Tx {
        nonce,
        sender_pub: sk.verifying_key().to_bytes(),
        to,
        amount,
        energy_limit: 100_000,
        energy_price: 1,
        kind: TxKind::Transfer,
        payload: vec![],
        signature: vec![],
    };
    tx.signature = sk.sign(&tx.signing_bytes()).to_bytes().to_vec();
    tx
}

pub fn addr_of_key(sk: &SigningKey) -> Address {
    address_of(&sk.verifying_key().to_bytes())
}

/// Grow the chain by `n` mining blocks from the current best; returns the
/// imported blocks.
pub fn grow(chain: &mut Chain, n: usize) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(n);
    for _ in 0..n {
        let best = chain.best_block();
        let block = mine_on(chain, &best, vec![]);
        let result = chain.import(&block).expect("import");
        assert!(result.is_successful(), "grow import failed: {:?}", result);
        blocks.push(block);
    }
    blocks
}

#[allow(dead_code)]
pub fn seal_type_of(block: &Block) -> SealType {
    block.seal_type()
}
