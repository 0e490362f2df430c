// Proof-of-work - Nonce search over a prepared block template
//
// The search is CPU-bound; callers run it on a blocking worker and can
// abort it through a shared CancelFlag, polled every CANCEL_CHECK_INTERVAL
// nonces.

use crate::ledger::block::{hash_prefix, Block};
use crate::tx::Transaction;
use sha2::Digest;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Highest accepted difficulty (leading zero hex digits)
pub const MAX_DIFFICULTY: u32 = 16;

const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Shared cancellation signal for an in-flight search
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Result of a nonce search
#[derive(Debug)]
pub enum MineOutcome {
    Mined(Block),
    /// Search aborted; the template is handed back so its transactions can
    /// return to the pending pool
    Cancelled(BlockTemplate),
}

/// Everything a block needs except its nonce and hash
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub(crate) index: u64,
    pub(crate) timestamp: i64,
    pub(crate) previous_hash: String,
    pub(crate) transactions: Vec<Transaction>,
    pub(crate) merkle_root: String,
    pub(crate) difficulty: u32,
}

impl BlockTemplate {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Transactions other than the block reward
    pub fn into_user_transactions(self) -> Vec<Transaction> {
        self.transactions
            .into_iter()
            .filter(|tx| !tx.is_reward())
            .collect()
    }

    /// Search nonces from zero until the hash meets the difficulty
    pub fn mine(self, cancel: &CancelFlag) -> MineOutcome {
        let prefix = hash_prefix(
            self.index,
            &self.previous_hash,
            self.timestamp,
            &self.transactions,
            &self.merkle_root,
        );

        let mut nonce: u64 = 0;
        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return MineOutcome::Cancelled(self);
            }

            let mut hasher = prefix.clone();
            hasher.update(nonce.to_le_bytes());
            let digest = hasher.finalize();

            if meets_difficulty(&digest, self.difficulty) {
                return MineOutcome::Mined(Block::from_parts(
                    self.index,
                    self.timestamp,
                    self.transactions,
                    self.previous_hash,
                    hex::encode(digest),
                    nonce,
                    self.merkle_root,
                ));
            }

            nonce = nonce.wrapping_add(1);
        }
    }
}

/// Whether `digest` starts with `difficulty` zero hex digits
pub fn meets_difficulty(digest: &[u8], difficulty: u32) -> bool {
    let nibbles = difficulty as usize;
    if nibbles > digest.len() * 2 {
        return false;
    }
    (0..nibbles).all(|i| {
        let byte = digest[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        nibble == 0
    })
}

/// Same check over a hex encoded hash
pub(crate) fn hex_meets_difficulty(hash: &str, difficulty: u32) -> bool {
    hash.len() >= difficulty as usize && hash.bytes().take(difficulty as usize).all(|b| b == b'0')
}
