//! Core block / transaction / receipt types shared across the kernel.
//!
//! Hashes are blake3 over the bincode encoding of the value. A block header
//! has two hashes: the full hash (seal included) identifies the block, the
//! pre-seal hash (seal fields blanked) is the message that mining solutions
//! and staking signatures commit to.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type Hash = [u8; 32];
pub type Address = [u8; 32];

pub const ZERO_HASH: Hash = [0u8; 32];
pub const MAX_EXTRA_DATA_BYTES: usize = 32;

/// blake3 convenience wrapper used for every content hash in the kernel.
pub fn blake3_hash(bytes: &[u8]) -> Hash {
    *blake3::hash(bytes).as_bytes()
}

/// Derive the account address for an ed25519 public key.
pub fn address_of(public_key: &[u8; 32]) -> Address {
    blake3_hash(public_key)
}

/// Short hex for log lines.
pub fn short_hex(h: &Hash) -> String {
    hex::encode(&h[..4])
}

// =================== Seals ===================

/// How a block was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SealType {
    Mining,
    Staking,
}

impl SealType {
    pub fn opposite(self) -> SealType {
        match self {
            SealType::Mining => SealType::Staking,
            SealType::Staking => SealType::Mining,
        }
    }
}

impl fmt::Display for SealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SealType::Mining => write!(f, "mining"),
            SealType::Staking => write!(f, "staking"),
        }
    }
}

/// Seal-specific header fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SealData {
    Mining {
        nonce: u64,
        solution: Vec<u8>,
    },
    Staking {
        /// Chained VRF-style seed: an ed25519 signature over the previous
        /// staking seed by `signing_pub`.
        seed: Vec<u8>,
        signing_pub: [u8; 32],
        /// Signature over the pre-seal hash.
        signature: Vec<u8>,
    },
}

impl SealData {
    pub fn seal_type(&self) -> SealType {
        match self {
            SealData::Mining { .. } => SealType::Mining,
            SealData::Staking { .. } => SealType::Staking,
        }
    }

    /// The same seal with the proof fields blanked; pre-seal hashes are
    /// computed over this so a solution/signature can commit to the header.
    fn blanked(&self) -> SealData {
        match self {
            SealData::Mining { .. } => SealData::Mining { nonce: 0, solution: Vec::new() },
            SealData::Staking { seed, signing_pub, .. } => SealData::Staking {
                seed: seed.clone(),
                signing_pub: *signing_pub,
                signature: Vec::new(),
            },
        }
    }
}

// =================== Bloom ===================

pub const BLOOM_BYTES: usize = 256;
const BLOOM_BITS: u32 = (BLOOM_BYTES as u32) * 8;

/// 2048-bit log bloom. Three bits per inserted item.
#[derive(Clone, PartialEq, Eq)]
pub struct Bloom(pub [u8; BLOOM_BYTES]);

impl Bloom {
    pub fn zero() -> Bloom {
        Bloom([0u8; BLOOM_BYTES])
    }

    pub fn insert(&mut self, item: &[u8]) {
        let h = blake3_hash(item);
        for chunk in h.chunks(2).take(3) {
            let bit = (u16::from_be_bytes([chunk[0], chunk[1]]) as u32) % BLOOM_BITS;
            self.0[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    pub fn or_with(&mut self, other: &Bloom) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a |= b;
        }
    }

    pub fn contains(&self, item: &[u8]) -> bool {
        let h = blake3_hash(item);
        h.chunks(2).take(3).all(|chunk| {
            let bit = (u16::from_be_bytes([chunk[0], chunk[1]]) as u32) % BLOOM_BITS;
            self.0[(bit / 8) as usize] & (1 << (bit % 8)) != 0
        })
    }
}

impl Default for Bloom {
    fn default() -> Self {
        Bloom::zero()
    }
}

impl fmt::Debug for Bloom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bloom({}…)", hex::encode(&self.0[..8]))
    }
}

// serde as hex string; keeps json-stored blocks readable
impl Serialize for Bloom {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Bloom {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        let bytes = hex::decode(&raw).map_err(serde::de::Error::custom)?;
        if bytes.len() != BLOOM_BYTES {
            return Err(serde::de::Error::custom("bloom must be 256 bytes"));
        }
        let mut out = [0u8; BLOOM_BYTES];
        out.copy_from_slice(&bytes);
        Ok(Bloom(out))
    }
}

// =================== Transactions ===================

/// Transaction kind; `Delegation` is gated by the unity fork height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    Transfer,
    Delegation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub nonce: u64,
    pub sender_pub: [u8; 32],
    pub to: Address,
    pub amount: u128,
    pub energy_limit: u64,
    pub energy_price: u64,
    pub kind: TxKind,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Tx {
    pub fn sender_address(&self) -> Address {
        address_of(&self.sender_pub)
    }

    pub fn hash(&self) -> Hash {
        blake3_hash(&bincode::serialize(self).unwrap())
    }

    /// Bytes the sender signs: the transaction with the signature cleared.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        unsigned.signature = Vec::new();
        bincode::serialize(&unsigned).unwrap()
    }

    pub fn verify_signature(&self) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(&self.sender_pub) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&self.signature) else {
            return false;
        };
        vk.verify(&self.signing_bytes(), &sig).is_ok()
    }
}

// =================== Blocks ===================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent_hash: Hash,
    pub height: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub extra_data: Vec<u8>,
    pub difficulty: u64,
    pub tx_root: Hash,
    pub receipts_root: Hash,
    pub log_bloom: Bloom,
    pub state_root: Hash,
    pub energy_limit: u64,
    pub energy_used: u64,
    pub seal: SealData,
}

impl BlockHeader {
    pub fn seal_type(&self) -> SealType {
        self.seal.seal_type()
    }

    pub fn hash(&self) -> Hash {
        blake3_hash(&bincode::serialize(self).unwrap())
    }

    /// Hash with the seal proof blanked; this is the PoW message and the
    /// staking signing message.
    pub fn pre_seal_hash(&self) -> Hash {
        let mut blank = self.clone();
        blank.seal = self.seal.blanked();
        blake3_hash(&bincode::serialize(&blank).unwrap())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Tx>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn seal_type(&self) -> SealType {
        self.header.seal_type()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0
    }

    pub fn is_parent_of(&self, other: &Block) -> bool {
        other.header.parent_hash == self.hash()
    }
}

// =================== Receipts & summaries ===================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub ok: bool,
    pub error: Option<String>,
    pub energy_used: u64,
    pub logs: Vec<LogEntry>,
}

impl Receipt {
    pub fn bloom(&self) -> Bloom {
        let mut bloom = Bloom::zero();
        for log in &self.logs {
            bloom.insert(&log.address);
            for topic in &log.topics {
                bloom.insert(topic);
            }
        }
        bloom
    }
}

/// Outcome of executing one transaction, as reported by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxExecSummary {
    pub tx: Tx,
    pub receipt: Receipt,
    /// Rejected transactions are dropped while building templates and fail
    /// the whole block on import.
    pub rejected: bool,
    pub energy_used: u64,
    pub fee: u128,
}

/// Immutable result of executing one block. Produced once, never mutated.
#[derive(Debug, Clone)]
pub struct BlockSummary {
    pub block: Block,
    pub rewards: BTreeMap<Address, u128>,
    pub receipts: Vec<Receipt>,
    pub summaries: Vec<TxExecSummary>,
}

// =================== Import results ===================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportResult {
    ImportedBest,
    ImportedSide,
    AlreadyExists,
    NoParent,
    Invalid,
}

impl ImportResult {
    pub fn is_successful(&self) -> bool {
        matches!(self, ImportResult::ImportedBest | ImportResult::ImportedSide)
    }
}

/// Result of a trust-but-verify pivot import (no validation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastImportResult {
    Imported,
    AlreadyKnown,
    NoChild,
    Invalid,
}

// =================== Roots ===================

/// Binary blake3 merkle root; odd leaf is paired with itself, empty set
/// hashes to zero.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return ZERO_HASH;
    }
    let mut hashes: Vec<Hash> = leaves.to_vec();
    while hashes.len() > 1 {
        let mut next_level = Vec::with_capacity(hashes.len().div_ceil(2));
        for chunk in hashes.chunks(2) {
            let mut data = Vec::with_capacity(64);
            data.extend_from_slice(&chunk[0]);
            if chunk.len() > 1 {
                data.extend_from_slice(&chunk[1]);
            } else {
                data.extend_from_slice(&chunk[0]);
            }
            next_level.push(blake3_hash(&data));
        }
        hashes = next_level;
    }
    hashes[0]
}

pub fn tx_root(txs: &[Tx]) -> Hash {
    let leaves: Vec<Hash> = txs.iter().map(Tx::hash).collect();
    merkle_root(&leaves)
}

pub fn receipts_root(receipts: &[Receipt]) -> Hash {
    let leaves: Vec<Hash> = receipts
        .iter()
        .map(|r| blake3_hash(&bincode::serialize(r).unwrap()))
        .collect();
    merkle_root(&leaves)
}

pub fn log_bloom(receipts: &[Receipt]) -> Bloom {
    let mut bloom = Bloom::zero();
    for receipt in receipts {
        bloom.or_with(&receipt.bloom());
    }
    bloom
}
