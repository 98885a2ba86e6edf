//! Chain state and the single-writer kernel surface.
//!
//! `Chain` owns the canonical pointers, the dual-difficulty totals, the
//! working world state and the block index. Every mutating entry point
//! (`import`, the template builders, recovery) takes `&mut self`; the host
//! serializes them behind one lock. Readers go through the published head
//! view, which is swapped atomically at commit and never exposes a
//! mid-evaluation state.

pub mod accept;
pub mod executor;
pub mod recovery;
pub mod state_stack;
pub mod template;

use dashmap::DashMap;
use parking_lot::RwLock;
use primitive_types::U256;
use std::sync::Arc;
use tracing::info;

use crate::config::ChainParams;
use crate::consensus::staking::StakeOracle;
use crate::consensus::DualDifficulty;
use crate::exec::TransactionExecutor;
use crate::genesis;
use crate::notify::NotificationSink;
use crate::pow::PowValidator;
use crate::state::{StateStore, WorldState};
use crate::store::BlockStore;
use crate::types::{
    Address, Block, BlockHeader, FastImportResult, Hash, ImportResult, SealType, Tx, ZERO_HASH,
};
use crate::{now_ts, KernelError};

/// Candidates farther than this from the best height are better fetched in
/// bulk by the sync layer before attempting connection.
const TRY_CONNECT_WINDOW: u64 = 32;

/// Injected collaborators. Defaults wire the built-in ledger executor, the
/// blake3 PoW target check, a zero-stake oracle (staking disabled) and the
/// logging sink.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn TransactionExecutor>,
    pub pow: Arc<dyn PowValidator>,
    pub stake: Arc<dyn StakeOracle>,
    pub sink: Arc<dyn NotificationSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Collaborators {
            executor: Arc::new(crate::exec::LedgerExecutor),
            pow: Arc::new(crate::pow::BlakePowValidator),
            stake: Arc::new(crate::consensus::staking::NoStake),
            sink: Arc::new(crate::notify::LogSink),
        }
    }
}

/// Read-only snapshot of the canonical head, published at commit.
#[derive(Debug, Clone)]
pub struct HeadView {
    pub block: Block,
    pub height: u64,
    pub dual: DualDifficulty,
    pub combined: U256,
}

/// Cheap cloneable reader handle; never blocks the writer for long.
#[derive(Clone)]
pub struct HeadHandle(Arc<RwLock<Arc<HeadView>>>);

impl HeadHandle {
    pub fn current(&self) -> Arc<HeadView> {
        self.0.read().clone()
    }
}

pub struct Chain {
    pub(crate) params: ChainParams,
    pub(crate) store: BlockStore,
    pub(crate) world: WorldState,
    pub(crate) best_block: Block,
    pub(crate) best_mining: Block,
    pub(crate) best_staking: Option<Block>,
    pub(crate) td: DualDifficulty,
    /// Height of the most recent re-branch point, cleared by the next
    /// direct-extend commit. Drives the execution caching hint.
    pub(crate) fork_level: Option<u64>,
    pub(crate) published: Arc<RwLock<Arc<HeadView>>>,
    pub(crate) staking_templates: DashMap<Hash, Block>,
    pub(crate) executor: Arc<dyn TransactionExecutor>,
    pub(crate) pow: Arc<dyn PowValidator>,
    pub(crate) stake: Arc<dyn StakeOracle>,
    pub(crate) sink: Arc<dyn NotificationSink>,
    pub(crate) genesis: Block,
    pub(crate) staking_genesis: Block,
}

impl Chain {
    /// Open (or create) a chain database at `path`.
    pub fn open(
        path: &str,
        params: ChainParams,
        collaborators: Collaborators,
        premine: &[(Address, u128)],
    ) -> Result<Chain, KernelError> {
        let db = sled::open(path)?;
        Chain::with_db(db, params, collaborators, premine)
    }

    /// Build a chain over an already opened database (tests use a temporary
    /// one).
    pub fn with_db(
        db: sled::Db,
        params: ChainParams,
        collaborators: Collaborators,
        premine: &[(Address, u128)],
    ) -> Result<Chain, KernelError> {
        let state_store = StateStore::open(&db)?;
        let store = BlockStore::open(&db)?;
        let mut world = WorldState::new(state_store, premine)?;

        let genesis_block = genesis::mining_genesis(&params, world.root());
        let staking_genesis = genesis::synthetic_staking_genesis(&params, &genesis_block);

        let (best_block, td) = match store.genesis_hash()? {
            None => {
                // fresh database: seed it with genesis
                let td = DualDifficulty::genesis(&params);
                store.save(&genesis_block, &td, true)?;
                store.set_genesis_hash(&genesis_block.hash())?;
                store.set_best_hash(&genesis_block.hash())?;
                store.flush()?;
                info!(hash = %hex::encode(genesis_block.hash()), "chain initialized at genesis");
                (genesis_block.clone(), td)
            }
            Some(stored) => {
                genesis::check_stored_genesis(&stored, &genesis_block)
                    .map_err(|e| KernelError::Fatal(e.to_string()))?;
                let best_hash = store
                    .best_hash()?
                    .ok_or_else(|| KernelError::Codec("store has genesis but no best block".into()))?;
                let best = store
                    .block_by_hash(&best_hash)?
                    .ok_or_else(|| KernelError::Codec("best block missing from store".into()))?;
                let td = store
                    .dual_difficulty_of(&best_hash)?
                    .unwrap_or_else(|| DualDifficulty::genesis(&params));
                world.set_root(&best.header.state_root)?;
                info!(height = best.height(), "chain reopened");
                (best, td)
            }
        };

        let published = Arc::new(RwLock::new(Arc::new(HeadView {
            block: best_block.clone(),
            height: best_block.height(),
            dual: td,
            combined: td.combined(),
        })));

        let mut chain = Chain {
            params,
            store,
            world,
            best_block: best_block.clone(),
            best_mining: genesis_block.clone(),
            best_staking: None,
            td,
            fork_level: None,
            published,
            staking_templates: DashMap::new(),
            executor: collaborators.executor,
            pow: collaborators.pow,
            stake: collaborators.stake,
            sink: collaborators.sink,
            genesis: genesis_block,
            staking_genesis,
        };
        chain.recompute_seal_pointers()?;
        Ok(chain)
    }

    // =================== read accessors ===================

    /// The published best block (changes only on a committed best import).
    pub fn best_block(&self) -> Block {
        self.published.read().block.clone()
    }

    /// Combined fork-choice score of the published head.
    pub fn total_difficulty(&self) -> U256 {
        self.published.read().combined
    }

    pub fn dual_difficulty(&self) -> DualDifficulty {
        self.published.read().dual
    }

    /// Cloneable handle for lock-free readers.
    pub fn head(&self) -> HeadHandle {
        HeadHandle(self.published.clone())
    }

    pub fn is_main_chain(&self, hash: &Hash, height: u64) -> bool {
        self.store.is_main_chain(hash, height)
    }

    pub fn block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, KernelError> {
        self.store.block_by_hash(hash)
    }

    pub fn block_by_height(&self, height: u64) -> Result<Option<Block>, KernelError> {
        self.store.block_by_height(height)
    }

    pub fn genesis_block(&self) -> &Block {
        &self.genesis
    }

    /// Root of the working world state.
    pub fn state_root(&self) -> Hash {
        self.world.root()
    }

    /// The block index store (sync layers need raw access, e.g. to stage
    /// pivot blocks).
    pub fn index_store(&self) -> &BlockStore {
        &self.store
    }

    /// The world-state version store.
    pub fn state_store(&self) -> &StateStore {
        self.world.store()
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Heuristic for the sync layer: a candidate far outside the working
    /// window is better staged than connected one-by-one.
    pub fn skip_try_connect(&self, height: u64) -> bool {
        let best = self.published.read().height;
        height > best + TRY_CONNECT_WINDOW || height + TRY_CONNECT_WINDOW < best
    }

    // =================== mutation entry points ===================

    pub fn import(&mut self, block: &Block) -> Result<ImportResult, KernelError> {
        accept::try_connect(self, block, now_ts())
    }

    /// Import with an explicit wall-clock second, so tests can feed
    /// timestamps manually.
    pub fn import_at(&mut self, block: &Block, now_secs: u64) -> Result<ImportResult, KernelError> {
        accept::try_connect(self, block, now_secs)
    }

    pub fn fast_import(&mut self, block: &Block) -> Result<FastImportResult, KernelError> {
        accept::try_fast_import(self, block, now_ts())
    }

    pub fn build_mining_template(
        &mut self,
        parent: &Block,
        txs: Vec<Tx>,
        wait_for_block_time: bool,
    ) -> Result<Block, KernelError> {
        template::build_mining_template(self, parent, txs, wait_for_block_time)
    }

    pub fn build_staking_template(
        &mut self,
        parent: &Block,
        txs: Vec<Tx>,
        seed: Vec<u8>,
        signing_pub: [u8; 32],
        signing_key: Option<&ed25519_dalek::SigningKey>,
    ) -> Result<Option<Block>, KernelError> {
        template::build_staking_template(self, parent, txs, seed, signing_pub, signing_key)
    }

    /// Finalize a cached staking template with an externally produced
    /// signature.
    pub fn seal_staking_template(&self, pre_seal_hash: &Hash, signature: Vec<u8>) -> Option<Block> {
        template::seal_staking_template(self, pre_seal_hash, signature)
    }

    pub fn recover_state(&mut self, block: &Block) -> Result<bool, KernelError> {
        recovery::recover_state(self, block)
    }

    pub fn recover_index(&mut self, block: &Block) -> Result<bool, KernelError> {
        recovery::recover_index(self, block)
    }

    // =================== internals ===================

    /// Nearest ancestor with the given seal, starting at `from` inclusive.
    pub(crate) fn sealed_ancestor_from(
        &self,
        from: &Hash,
        seal: SealType,
    ) -> Result<Option<Block>, KernelError> {
        let mut cursor = *from;
        loop {
            if cursor == ZERO_HASH {
                return Ok(None);
            }
            let Some(block) = self.store.block_by_hash(&cursor)? else {
                return Ok(None);
            };
            if block.seal_type() == seal {
                return Ok(Some(block));
            }
            cursor = block.header.parent_hash;
        }
    }

    /// Same-seal parent and grandparent for a candidate whose parent is
    /// `parent_hash`. Falls back to the (synthetic) genesis of that seal
    /// when the chain is too young — the rules treat that case with the
    /// no-grandparent difficulty formula rather than failing.
    pub(crate) fn seal_ancestry(
        &self,
        parent_hash: &Hash,
        seal: SealType,
    ) -> Result<(Block, Option<Block>), KernelError> {
        match self.sealed_ancestor_from(parent_hash, seal)? {
            Some(same_seal_parent) => {
                let grandparent =
                    self.sealed_ancestor_from(&same_seal_parent.header.parent_hash, seal)?;
                Ok((same_seal_parent, grandparent))
            }
            None => match seal {
                SealType::Mining => Ok((self.genesis.clone(), None)),
                SealType::Staking => Ok((self.staking_genesis.clone(), None)),
            },
        }
    }

    /// Nearest ancestor of the opposite seal — the candidate's antiparent.
    /// Resolved through the index, never stored as a pointer.
    pub fn antiparent_of(&self, header: &BlockHeader) -> Result<Option<Block>, KernelError> {
        self.sealed_ancestor_from(&header.parent_hash, header.seal_type().opposite())
    }

    /// Update the canonical pointers after a commit that extends the
    /// working best.
    pub(crate) fn set_best(&mut self, block: Block) {
        match block.seal_type() {
            SealType::Mining => self.best_mining = block.clone(),
            SealType::Staking => self.best_staking = Some(block.clone()),
        }
        self.best_block = block;
    }

    /// Repoint the working best at an arbitrary stored block, recomputing
    /// both per-seal pointers from its ancestry.
    pub(crate) fn set_working_best(&mut self, block: Block) -> Result<(), KernelError> {
        self.best_mining = match block.seal_type() {
            SealType::Mining => block.clone(),
            SealType::Staking => self
                .sealed_ancestor_from(&block.header.parent_hash, SealType::Mining)?
                .unwrap_or_else(|| self.genesis.clone()),
        };
        self.best_staking = match block.seal_type() {
            SealType::Staking => Some(block.clone()),
            SealType::Mining => {
                self.sealed_ancestor_from(&block.header.parent_hash, SealType::Staking)?
            }
        };
        self.best_block = block;
        Ok(())
    }

    pub(crate) fn recompute_seal_pointers(&mut self) -> Result<(), KernelError> {
        let best = self.best_block.clone();
        self.set_working_best(best)
    }

    /// Best-effort notification fan-out; sink failures are logged, never
    /// propagated into the import result.
    pub(crate) fn notify(&self, summary: &crate::types::BlockSummary, is_best: bool) {
        if let Err(e) = self.sink.block_connected(summary) {
            tracing::warn!(err = %e, "notification sink failed");
        }
        if is_best {
            if let Err(e) = self.sink.new_best(&summary.block) {
                tracing::warn!(err = %e, "best-block notification failed");
            }
        }
    }

    /// Swap the published head. Called only at commit, after all
    /// speculative work for the import has finished.
    pub(crate) fn publish_head(&self) {
        let view = Arc::new(HeadView {
            block: self.best_block.clone(),
            height: self.best_block.height(),
            dual: self.td,
            combined: self.td.combined(),
        });
        *self.published.write() = view;
        crate::metrics::PROM_TANDEM_HEIGHT.set(self.best_block.height() as i64);
    }
}
