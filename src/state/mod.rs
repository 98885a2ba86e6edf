//! Root-addressed world state.
//!
//! Accounts are a flat balance/nonce map; every committed version of the map
//! is persisted under its content root so any historical root can be
//! reloaded byte-for-byte. The import path relies on that for speculative
//! fork evaluation (snapshot to a parent root, mutate, and either keep the
//! new root or hard-reset to the saved one).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{blake3_hash, merkle_root, Address, Hash};
use crate::KernelError;

const STATE_TREE: &str = "state";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: u128,
    pub nonce: u64,
}

pub type Accounts = BTreeMap<Address, AccountState>;

/// Content root of an account map: a merkle root over sorted account leaves.
pub fn state_root(accounts: &Accounts) -> Hash {
    let leaves: Vec<Hash> = accounts
        .iter()
        .map(|(addr, acct)| {
            let mut data = Vec::with_capacity(32 + 16 + 8);
            data.extend_from_slice(addr);
            data.extend_from_slice(&acct.balance.to_be_bytes());
            data.extend_from_slice(&acct.nonce.to_be_bytes());
            blake3_hash(&data)
        })
        .collect();
    merkle_root(&leaves)
}

/// Persistent store of state versions, keyed by root.
pub struct StateStore {
    tree: sled::Tree,
}

impl StateStore {
    pub fn open(db: &sled::Db) -> Result<StateStore, KernelError> {
        Ok(StateStore { tree: db.open_tree(STATE_TREE)? })
    }

    pub fn commit(&self, accounts: &Accounts) -> Result<Hash, KernelError> {
        let root = state_root(accounts);
        let encoded: Vec<(String, AccountState)> = accounts
            .iter()
            .map(|(addr, acct)| (hex::encode(addr), acct.clone()))
            .collect();
        let bytes = serde_json::to_vec(&encoded).map_err(|e| KernelError::Codec(e.to_string()))?;
        self.tree.insert(root, bytes)?;
        Ok(root)
    }

    pub fn load(&self, root: &Hash) -> Result<Option<Accounts>, KernelError> {
        let Some(bytes) = self.tree.get(root)? else {
            return Ok(None);
        };
        let encoded: Vec<(String, AccountState)> =
            serde_json::from_slice(&bytes).map_err(|e| KernelError::Codec(e.to_string()))?;
        let mut accounts = Accounts::new();
        for (addr_hex, acct) in encoded {
            let bytes = hex::decode(&addr_hex).map_err(|e| KernelError::Codec(e.to_string()))?;
            let addr: Address = bytes
                .as_slice()
                .try_into()
                .map_err(|_| KernelError::Codec(format!("bad address key: {}", addr_hex)))?;
            accounts.insert(addr, acct);
        }
        Ok(Some(accounts))
    }

    pub fn is_valid_root(&self, root: &Hash) -> bool {
        self.tree.contains_key(root).unwrap_or(false)
    }

    /// Drop a stored version; used by tests to simulate pruning/corruption.
    pub fn forget(&self, root: &Hash) -> Result<(), KernelError> {
        self.tree.remove(root)?;
        Ok(())
    }
}

/// Read-only view of the accounts at some historical root.
pub struct StateReader {
    accounts: Accounts,
}

impl StateReader {
    pub fn nonce_of(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn balance_of(&self, address: &Address) -> u128 {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }
}

/// The mutable working state: the materialized account map at `root`.
pub struct WorldState {
    store: StateStore,
    accounts: Accounts,
    root: Hash,
}

impl WorldState {
    /// Initialize from a premine. The initial version is committed so the
    /// genesis root is always reloadable.
    pub fn new(store: StateStore, premine: &[(Address, u128)]) -> Result<WorldState, KernelError> {
        let mut accounts = Accounts::new();
        for (addr, balance) in premine {
            accounts.insert(*addr, AccountState { balance: *balance, nonce: 0 });
        }
        let root = store.commit(&accounts)?;
        Ok(WorldState { store, accounts, root })
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn is_valid_root(&self, root: &Hash) -> bool {
        self.store.is_valid_root(root)
    }

    /// Hard rollback: reload the account map stored under `root`.
    pub fn set_root(&mut self, root: &Hash) -> Result<(), KernelError> {
        let accounts = self
            .store
            .load(root)?
            .ok_or_else(|| KernelError::MissingState(hex::encode(root)))?;
        self.accounts = accounts;
        self.root = *root;
        Ok(())
    }

    /// Read-only snapshot of the accounts at a historical root.
    pub fn reader_at(&self, root: &Hash) -> Result<StateReader, KernelError> {
        let accounts = self
            .store
            .load(root)?
            .ok_or_else(|| KernelError::MissingState(hex::encode(root)))?;
        Ok(StateReader { accounts })
    }

    pub fn nonce_of(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn balance_of(&self, address: &Address) -> u128 {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }

    /// Begin a tracked mutation set on top of the current accounts.
    pub fn start_tracking(&mut self) -> TrackedState<'_> {
        TrackedState { world: self, dirty: Accounts::new() }
    }

    /// Persist the current account map and advance the root to it.
    pub fn flush(&mut self) -> Result<Hash, KernelError> {
        let root = self.store.commit(&self.accounts)?;
        self.root = root;
        Ok(root)
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }
}

/// Buffered mutations; nothing touches the underlying map until `apply`.
pub struct TrackedState<'a> {
    world: &'a mut WorldState,
    dirty: Accounts,
}

impl TrackedState<'_> {
    fn entry(&mut self, address: &Address) -> &mut AccountState {
        if !self.dirty.contains_key(address) {
            let base = self.world.accounts.get(address).cloned().unwrap_or_default();
            self.dirty.insert(*address, base);
        }
        self.dirty.get_mut(address).unwrap()
    }

    pub fn nonce_of(&self, address: &Address) -> u64 {
        self.dirty
            .get(address)
            .map(|a| a.nonce)
            .unwrap_or_else(|| self.world.nonce_of(address))
    }

    pub fn balance_of(&self, address: &Address) -> u128 {
        self.dirty
            .get(address)
            .map(|a| a.balance)
            .unwrap_or_else(|| self.world.balance_of(address))
    }

    pub fn add_balance(&mut self, address: &Address, amount: u128) {
        let acct = self.entry(address);
        acct.balance = acct.balance.saturating_add(amount);
    }

    pub fn sub_balance(&mut self, address: &Address, amount: u128) {
        let acct = self.entry(address);
        acct.balance = acct.balance.saturating_sub(amount);
    }

    pub fn increment_nonce(&mut self, address: &Address) {
        let acct = self.entry(address);
        acct.nonce += 1;
    }

    /// Merge the buffered mutations into the working account map. The new
    /// version is not persisted until `WorldState::flush`.
    pub fn apply(self) {
        for (addr, acct) in self.dirty {
            self.world.accounts.insert(addr, acct);
        }
    }

    /// Drop all buffered mutations.
    pub fn rollback(self) {}
}
