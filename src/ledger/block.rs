use crate::tx::Transaction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Previous-hash sentinel carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// A sealed batch of transactions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    index: u64,
    timestamp: i64,
    transactions: Vec<Transaction>,
    previous_hash: String,
    hash: String,
    nonce: u64,
    merkle_root: String,
}

impl Block {
    /// The deterministic genesis block shared by every wallet
    pub fn genesis() -> Self {
        let merkle_root = super::merkle_root(&[]);
        let previous_hash = GENESIS_PREVIOUS_HASH.to_string();
        let hash = compute_hash(0, &previous_hash, 0, &[], &merkle_root, 0);
        Self {
            index: 0,
            timestamp: 0,
            transactions: Vec::new(),
            previous_hash,
            hash,
            nonce: 0,
            merkle_root,
        }
    }

    /// Reassemble a block from stored fields. Nothing is recomputed; use
    /// [`Block::verify_hash`] before trusting it.
    pub fn from_parts(
        index: u64,
        timestamp: i64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        hash: String,
        nonce: u64,
        merkle_root: String,
    ) -> Self {
        Self {
            index,
            timestamp,
            transactions,
            previous_hash,
            hash,
            nonce,
            merkle_root,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn merkle_root(&self) -> &str {
        &self.merkle_root
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Recompute the hash from the stored fields
    pub fn compute_hash(&self) -> String {
        compute_hash(
            self.index,
            &self.previous_hash,
            self.timestamp,
            &self.transactions,
            &self.merkle_root,
            self.nonce,
        )
    }

    /// Stored hash matches the stored fields
    pub fn verify_hash(&self) -> bool {
        self.compute_hash() == self.hash
    }

    /// Stored merkle root matches the stored transactions
    pub fn verify_merkle_root(&self) -> bool {
        super::merkle_root(&self.transactions) == self.merkle_root
    }

    pub(crate) fn into_transactions(self) -> Vec<Transaction> {
        self.transactions
    }
}

/// Hasher state over every block field except the nonce.
///
/// The nonce goes last so the proof-of-work search can clone this state
/// instead of rehashing the transactions for every attempt.
pub(crate) fn hash_prefix(
    index: u64,
    previous_hash: &str,
    timestamp: i64,
    transactions: &[Transaction],
    merkle_root: &str,
) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update(index.to_le_bytes());
    hasher.update((previous_hash.len() as u32).to_le_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(timestamp.to_le_bytes());
    hasher.update((transactions.len() as u32).to_le_bytes());
    for tx in transactions {
        let bytes = tx.canonical_bytes();
        hasher.update((bytes.len() as u32).to_le_bytes());
        hasher.update(&bytes);
    }
    hasher.update(merkle_root.as_bytes());
    hasher
}

pub(crate) fn compute_hash(
    index: u64,
    previous_hash: &str,
    timestamp: i64,
    transactions: &[Transaction],
    merkle_root: &str,
    nonce: u64,
) -> String {
    let mut hasher = hash_prefix(index, previous_hash, timestamp, transactions, merkle_root);
    hasher.update(nonce.to_le_bytes());
    hex::encode(hasher.finalize())
}
