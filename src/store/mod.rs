//! Block index store.
//!
//! One sled database, named trees: full blocks with their main-chain flag,
//! per-hash dual-difficulty records, the height → hash index for the main
//! chain, receipts per block and the transaction location index. The
//! difficulty record is written separately from the block so pivot-sync
//! blocks (saved without totals) read back as "stored but not indexed",
//! which is what the recovery walker repairs.

use serde::{Deserialize, Serialize};

use crate::consensus::DualDifficulty;
use crate::types::{Block, Hash, Receipt};
use crate::KernelError;

const BLOCKS_TREE: &str = "blocks";
const TD_TREE: &str = "td";
const INDEX_TREE: &str = "index";
const RECEIPTS_TREE: &str = "receipts";
const TXINDEX_TREE: &str = "txindex";
const META_TREE: &str = "meta";

const META_MAX_HEIGHT: &[u8] = b"max_height";
const META_BEST: &[u8] = b"best";
const META_GENESIS: &[u8] = b"genesis";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBlockInfo {
    pub block: Block,
    pub main_chain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLocation {
    pub block_hash: Hash,
    pub index: u32,
}

pub struct BlockStore {
    blocks: sled::Tree,
    td: sled::Tree,
    index: sled::Tree,
    receipts: sled::Tree,
    txindex: sled::Tree,
    meta: sled::Tree,
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, KernelError> {
    serde_json::to_vec(value).map_err(|e| KernelError::Codec(e.to_string()))
}

fn from_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, KernelError> {
    serde_json::from_slice(bytes).map_err(|e| KernelError::Codec(e.to_string()))
}

fn read_hash(bytes: &[u8]) -> Result<Hash, KernelError> {
    bytes
        .try_into()
        .map_err(|_| KernelError::Codec("stored hash is not 32 bytes".into()))
}

impl BlockStore {
    pub fn open(db: &sled::Db) -> Result<BlockStore, KernelError> {
        Ok(BlockStore {
            blocks: db.open_tree(BLOCKS_TREE)?,
            td: db.open_tree(TD_TREE)?,
            index: db.open_tree(INDEX_TREE)?,
            receipts: db.open_tree(RECEIPTS_TREE)?,
            txindex: db.open_tree(TXINDEX_TREE)?,
            meta: db.open_tree(META_TREE)?,
        })
    }

    // ---- blocks & difficulty records ----

    /// Save a block with its dual-difficulty totals. Main-chain blocks also
    /// get a height index entry and push the max height forward.
    pub fn save(
        &self,
        block: &Block,
        dual: &DualDifficulty,
        main_chain: bool,
    ) -> Result<(), KernelError> {
        let hash = block.hash();
        let info = StoredBlockInfo { block: block.clone(), main_chain };
        self.blocks.insert(&hash[..], to_json(&info)?)?;
        self.td.insert(&hash[..], to_json(dual)?)?;
        if main_chain {
            self.index.insert(block.height().to_be_bytes(), &hash[..])?;
            if block.height() > self.max_height() {
                self.set_max_height(block.height())?;
            }
        }
        Ok(())
    }

    /// Save a trusted pivot-sync block: indexed as main chain but without a
    /// difficulty record (totals are rebuilt once the chain is complete).
    pub fn save_pivot(&self, block: &Block) -> Result<(), KernelError> {
        let hash = block.hash();
        let info = StoredBlockInfo { block: block.clone(), main_chain: true };
        self.blocks.insert(&hash[..], to_json(&info)?)?;
        self.index.insert(block.height().to_be_bytes(), &hash[..])?;
        if block.height() > self.max_height() {
            self.set_max_height(block.height())?;
        }
        Ok(())
    }

    pub fn get(&self, hash: &Hash) -> Result<Option<StoredBlockInfo>, KernelError> {
        match self.blocks.get(hash)? {
            Some(bytes) => Ok(Some(from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, KernelError> {
        Ok(self.get(hash)?.map(|info| info.block))
    }

    pub fn is_block_stored(&self, hash: &Hash, height: u64) -> bool {
        matches!(self.get(hash), Ok(Some(info)) if info.block.height() == height)
    }

    pub fn dual_difficulty_of(&self, hash: &Hash) -> Result<Option<DualDifficulty>, KernelError> {
        match self.td.get(hash)? {
            Some(bytes) => Ok(Some(from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_dual_difficulty(&self, hash: &Hash, dual: &DualDifficulty) -> Result<(), KernelError> {
        self.td.insert(&hash[..], to_json(dual)?)?;
        Ok(())
    }

    /// A block is indexed once its difficulty record exists.
    pub fn is_indexed(&self, hash: &Hash) -> bool {
        self.td.contains_key(hash).unwrap_or(false)
    }

    // ---- main-chain membership ----

    pub fn main_chain_hash_at(&self, height: u64) -> Result<Option<Hash>, KernelError> {
        match self.index.get(height.to_be_bytes())? {
            Some(bytes) => Ok(Some(read_hash(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn block_by_height(&self, height: u64) -> Result<Option<Block>, KernelError> {
        match self.main_chain_hash_at(height)? {
            Some(hash) => self.block_by_hash(&hash),
            None => Ok(None),
        }
    }

    pub fn is_main_chain(&self, hash: &Hash, height: u64) -> bool {
        matches!(self.main_chain_hash_at(height), Ok(Some(h)) if h == *hash)
    }

    pub fn set_main_status(&self, hash: &Hash, main_chain: bool) -> Result<(), KernelError> {
        if let Some(mut info) = self.get(hash)? {
            info.main_chain = main_chain;
            self.blocks.insert(&hash[..], to_json(&info)?)?;
        }
        Ok(())
    }

    pub fn set_index_entry(&self, height: u64, hash: &Hash) -> Result<(), KernelError> {
        self.index.insert(height.to_be_bytes(), &hash[..])?;
        Ok(())
    }

    pub fn max_height(&self) -> u64 {
        self.meta
            .get(META_MAX_HEIGHT)
            .ok()
            .flatten()
            .and_then(|v| v.as_ref().try_into().ok().map(u64::from_be_bytes))
            .unwrap_or(0)
    }

    pub fn set_max_height(&self, height: u64) -> Result<(), KernelError> {
        self.meta.insert(META_MAX_HEIGHT, &height.to_be_bytes()[..])?;
        Ok(())
    }

    /// Point the main chain at `new_best`'s branch. Walks back to the common
    /// ancestor, demotes the old main blocks above it, promotes the branch
    /// and rewrites the height index. Returns the fork level (the common
    /// ancestor's height).
    pub fn rebranch(&self, new_best: &Block) -> Result<u64, KernelError> {
        let mut branch: Vec<Block> = Vec::new();
        let mut cursor = new_best.clone();
        while !self.is_main_chain(&cursor.hash(), cursor.height()) {
            let parent_hash = cursor.header.parent_hash;
            branch.push(cursor);
            cursor = self
                .block_by_hash(&parent_hash)?
                .ok_or_else(|| KernelError::Codec("missing ancestor during rebranch".into()))?;
        }
        let fork_level = cursor.height();
        let old_max = self.max_height();

        for height in (fork_level + 1)..=old_max {
            if let Some(old_hash) = self.main_chain_hash_at(height)? {
                self.set_main_status(&old_hash, false)?;
            }
            self.index.remove(height.to_be_bytes())?;
        }

        for block in branch.iter().rev() {
            self.set_main_status(&block.hash(), true)?;
            self.set_index_entry(block.height(), &block.hash())?;
        }
        self.set_max_height(new_best.height())?;
        Ok(fork_level)
    }

    // ---- receipts & transaction index ----

    pub fn put_receipts(&self, block_hash: &Hash, receipts: &[Receipt]) -> Result<(), KernelError> {
        self.receipts.insert(&block_hash[..], to_json(&receipts.to_vec())?)?;
        Ok(())
    }

    pub fn receipts_of(&self, block_hash: &Hash) -> Result<Option<Vec<Receipt>>, KernelError> {
        match self.receipts.get(block_hash)? {
            Some(bytes) => Ok(Some(from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_tx_locations(&self, block: &Block) -> Result<(), KernelError> {
        let block_hash = block.hash();
        for (i, tx) in block.txs.iter().enumerate() {
            let location = TxLocation { block_hash, index: i as u32 };
            self.txindex.insert(tx.hash(), to_json(&location)?)?;
        }
        Ok(())
    }

    pub fn tx_location(&self, tx_hash: &Hash) -> Result<Option<TxLocation>, KernelError> {
        match self.txindex.get(tx_hash)? {
            Some(bytes) => Ok(Some(from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    // ---- meta ----

    pub fn best_hash(&self) -> Result<Option<Hash>, KernelError> {
        match self.meta.get(META_BEST)? {
            Some(bytes) => Ok(Some(read_hash(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_best_hash(&self, hash: &Hash) -> Result<(), KernelError> {
        self.meta.insert(META_BEST, &hash[..])?;
        Ok(())
    }

    pub fn genesis_hash(&self) -> Result<Option<Hash>, KernelError> {
        match self.meta.get(META_GENESIS)? {
            Some(bytes) => Ok(Some(read_hash(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_genesis_hash(&self, hash: &Hash) -> Result<(), KernelError> {
        self.meta.insert(META_GENESIS, &hash[..])?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), KernelError> {
        self.blocks.flush()?;
        self.td.flush()?;
        self.index.flush()?;
        self.receipts.flush()?;
        self.txindex.flush()?;
        self.meta.flush()?;
        Ok(())
    }

    /// Drop a difficulty record; used by tests to simulate index corruption.
    pub fn forget_difficulty(&self, hash: &Hash) -> Result<(), KernelError> {
        self.td.remove(hash)?;
        Ok(())
    }
}
