// Ledger - The append-only chain owned by one wallet
//
// Mutated only by committing a newly sealed block or by replacing the whole
// chain with a validated snapshot. Balances come from an index updated on
// every commit, rebuilt on import.

use crate::clock::now_millis;
use crate::crypto::{new_id, Address};
use crate::ledger::pow::{hex_meets_difficulty, BlockTemplate, CancelFlag, MineOutcome};
use crate::ledger::{merkle_root, Block, MAX_DIFFICULTY};
use crate::tx::{Transaction, TransactionValidator, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// ERRORS
// ============================================================================

/// Hash, link or content mismatch found while validating a chain
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainIntegrityError {
    #[error("Chain is empty")]
    EmptyChain,

    #[error("Genesis block does not match")]
    GenesisMismatch,

    #[error("Block index mismatch: expected {expected}, got {got}")]
    IndexMismatch { expected: u64, got: u64 },

    #[error("Block {0}: stored hash does not match its contents")]
    HashMismatch(u64),

    #[error("Block {0}: previous hash does not link to the preceding block")]
    LinkMismatch(u64),

    #[error("Block {0}: merkle root does not match its transactions")]
    MerkleMismatch(u64),

    #[error("Block {0}: hash does not meet difficulty {1}")]
    InsufficientWork(u64, u32),

    #[error("Block {block}: invalid transaction {tx}: {reason}")]
    InvalidTransaction { block: u64, tx: String, reason: String },

    #[error("Block {0} does not extend the current tip")]
    StaleTip(u64),

    #[error("Snapshot encoding error: {0}")]
    Encoding(String),
}

/// Errors from ledger operations that are not integrity failures
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    Integrity(#[from] ChainIntegrityError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Sealing worker failed: {0}")]
    Worker(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration for the ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Leading zero hex digits required of a sealed block hash
    pub difficulty: u32,
    /// Amount paid by the reward transaction in every sealed block
    pub mining_reward: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: 4,
            mining_reward: 10,
        }
    }
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_mining_reward(mut self, reward: u64) -> Self {
        self.mining_reward = reward;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::InvalidConfig(format!(
                "difficulty must be <= {MAX_DIFFICULTY}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Whole-chain snapshot for persistence and peer exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub blocks: Vec<Block>,
}

impl ChainSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChainIntegrityError> {
        postcard::to_allocvec(self).map_err(|e| ChainIntegrityError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChainIntegrityError> {
        postcard::from_bytes(bytes).map_err(|e| ChainIntegrityError::Encoding(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

// ============================================================================
// LEDGER
// ============================================================================

pub struct Ledger {
    config: LedgerConfig,
    blocks: Vec<Block>,
    pending: Vec<Transaction>,
    /// Net balance per address over committed blocks
    balances: HashMap<Address, i64>,
    /// Ids of committed and pending transactions
    known_ids: HashSet<String>,
}

impl Ledger {
    /// Fresh ledger holding only the genesis block
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            blocks: vec![Block::genesis()],
            pending: Vec::new(),
            balances: HashMap::new(),
            known_ids: HashSet::new(),
        }
    }

    /// Ledger restored from a persisted snapshot, validated first
    pub fn from_snapshot(
        config: LedgerConfig,
        snapshot: ChainSnapshot,
    ) -> Result<Self, ChainIntegrityError> {
        let mut ledger = Self::new(config);
        ledger.import_snapshot(snapshot)?;
        Ok(ledger)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of blocks including genesis
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Index of the tip block
    pub fn height(&self) -> u64 {
        self.latest_block().index()
    }

    pub fn latest_block(&self) -> &Block {
        // The chain always holds at least genesis
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    /// Add a transaction to the pending pool. Only structural checks run
    /// here; signature checks belong to the caller.
    pub fn submit_pending(&mut self, tx: Transaction) -> Result<(), ValidationError> {
        TransactionValidator::validate_fields(&tx)?;
        if self.known_ids.contains(tx.id()) {
            return Err(ValidationError::Duplicate(tx.id().to_string()));
        }

        debug!(id = tx.id(), amount = tx.amount(), "Transaction added to pending pool");
        self.known_ids.insert(tx.id().to_string());
        self.pending.push(tx);
        Ok(())
    }

    /// Take the pending pool plus a reward transaction as the next block's
    /// contents. The pool is empty afterwards.
    pub fn prepare_block(&mut self, reward_address: &Address) -> BlockTemplate {
        let timestamp = now_millis();
        let mut transactions = std::mem::take(&mut self.pending);
        transactions.push(Transaction::reward(
            new_id(),
            reward_address.clone(),
            self.config.mining_reward,
            timestamp,
        ));

        let tip = self.latest_block();
        BlockTemplate {
            index: tip.index() + 1,
            timestamp,
            previous_hash: tip.hash().to_string(),
            merkle_root: merkle_root(&transactions),
            transactions,
            difficulty: self.config.difficulty,
        }
    }

    /// Put transactions from an abandoned template back at the front of the pool
    pub fn restore_pending(&mut self, transactions: Vec<Transaction>) {
        let mut restored: Vec<Transaction> = transactions
            .into_iter()
            .filter(|tx| !tx.is_reward())
            .collect();
        for tx in &restored {
            self.known_ids.insert(tx.id().to_string());
        }
        restored.append(&mut self.pending);
        self.pending = restored;
    }

    /// Append a mined block if it extends the current tip
    pub fn commit_block(&mut self, block: Block) -> Result<(), ChainIntegrityError> {
        let tip = self.latest_block();
        if block.index() != tip.index() + 1 || block.previous_hash() != tip.hash() {
            return Err(ChainIntegrityError::StaleTip(block.index()));
        }
        if !block.verify_merkle_root() {
            return Err(ChainIntegrityError::MerkleMismatch(block.index()));
        }
        if !block.verify_hash() {
            return Err(ChainIntegrityError::HashMismatch(block.index()));
        }

        for tx in block.transactions() {
            self.known_ids.insert(tx.id().to_string());
            apply_balance(&mut self.balances, tx);
        }

        info!(
            index = block.index(),
            hash = block.hash(),
            transactions = block.transactions().len(),
            "Block sealed"
        );
        self.blocks.push(block);
        Ok(())
    }

    /// Seal the pending pool into a block on the current thread
    pub fn seal_block(&mut self, reward_address: &Address) -> Result<Block, ChainIntegrityError> {
        let template = self.prepare_block(reward_address);
        match template.mine(&CancelFlag::new()) {
            MineOutcome::Mined(block) => {
                self.commit_block(block.clone())?;
                Ok(block)
            }
            // An unshared flag is never raised
            MineOutcome::Cancelled(template) => {
                let index = template.index();
                self.restore_pending(template.into_user_transactions());
                Err(ChainIntegrityError::StaleTip(index))
            }
        }
    }

    /// Net balance: credits minus debits over committed blocks
    pub fn balance_of(&self, address: &Address) -> i64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    /// Recompute every hash and link
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn validate(&self) -> Result<(), ChainIntegrityError> {
        validate_blocks(&self.blocks, None)
    }

    /// Replace the chain with a candidate after validating it in isolation.
    /// On any failure the live chain is untouched.
    pub fn import_snapshot(&mut self, snapshot: ChainSnapshot) -> Result<(), ChainIntegrityError> {
        if let Err(e) = validate_blocks(&snapshot.blocks, Some(self.config.difficulty)) {
            warn!(error = %e, "Rejected chain snapshot");
            return Err(e);
        }

        let mut balances = HashMap::new();
        let mut known_ids = HashSet::new();
        for tx in snapshot.blocks.iter().flat_map(|b| b.transactions()) {
            known_ids.insert(tx.id().to_string());
            apply_balance(&mut balances, tx);
        }

        // Pending entries already sealed in the candidate are dropped
        let pending: Vec<Transaction> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|tx| !known_ids.contains(tx.id()))
            .collect();
        for tx in &pending {
            known_ids.insert(tx.id().to_string());
        }

        info!(blocks = snapshot.blocks.len(), "Imported chain snapshot");
        self.blocks = snapshot.blocks;
        self.balances = balances;
        self.known_ids = known_ids;
        self.pending = pending;
        Ok(())
    }

    pub fn export_snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            blocks: self.blocks.clone(),
        }
    }

    /// Every committed transaction, oldest first
    pub fn all_transactions(&self) -> impl Iterator<Item = (&Block, &Transaction)> {
        self.blocks
            .iter()
            .flat_map(|block| block.transactions().iter().map(move |tx| (block, tx)))
    }

    /// Committed transactions sent or received by `address`
    pub fn transactions_for<'a>(
        &'a self,
        address: &'a Address,
    ) -> impl Iterator<Item = (&'a Block, &'a Transaction)> {
        self.all_transactions()
            .filter(move |(_, tx)| tx.from() == address || tx.to() == address)
    }

    pub fn contains_transaction(&self, id: &str) -> bool {
        self.known_ids.contains(id)
    }
}

fn apply_balance(balances: &mut HashMap<Address, i64>, tx: &Transaction) {
    let amount = i64::try_from(tx.amount()).unwrap_or(i64::MAX);
    if !tx.is_reward() {
        let from = balances.entry(tx.from().clone()).or_insert(0);
        *from = from.saturating_sub(amount);
    }
    let to = balances.entry(tx.to().clone()).or_insert(0);
    *to = to.saturating_add(amount);
}

/// Validate a block sequence on its own. `min_difficulty` is enforced on
/// every non-genesis block when given, along with transaction signatures.
fn validate_blocks(blocks: &[Block], min_difficulty: Option<u32>) -> Result<(), ChainIntegrityError> {
    let genesis = blocks.first().ok_or(ChainIntegrityError::EmptyChain)?;
    if genesis != &Block::genesis() {
        return Err(ChainIntegrityError::GenesisMismatch);
    }

    let mut seen = HashSet::new();
    for (position, pair) in blocks.windows(2).enumerate() {
        let (previous, block) = (&pair[0], &pair[1]);
        let expected = position as u64 + 1;

        if block.index() != expected {
            return Err(ChainIntegrityError::IndexMismatch {
                expected,
                got: block.index(),
            });
        }
        if block.previous_hash() != previous.hash() {
            return Err(ChainIntegrityError::LinkMismatch(block.index()));
        }
        if !block.verify_merkle_root() {
            return Err(ChainIntegrityError::MerkleMismatch(block.index()));
        }
        if !block.verify_hash() {
            return Err(ChainIntegrityError::HashMismatch(block.index()));
        }

        if let Some(difficulty) = min_difficulty {
            if !hex_meets_difficulty(block.hash(), difficulty) {
                return Err(ChainIntegrityError::InsufficientWork(block.index(), difficulty));
            }
            validate_block_transactions(block, &mut seen)?;
        }
    }
    Ok(())
}

fn validate_block_transactions(
    block: &Block,
    seen: &mut HashSet<String>,
) -> Result<(), ChainIntegrityError> {
    let invalid = |tx: &Transaction, reason: String| ChainIntegrityError::InvalidTransaction {
        block: block.index(),
        tx: tx.id().to_string(),
        reason,
    };

    let mut rewards = 0;
    for tx in block.transactions() {
        if !seen.insert(tx.id().to_string()) {
            return Err(invalid(tx, "duplicate id".to_string()));
        }
        if tx.is_reward() {
            rewards += 1;
            if tx.is_signed() || tx.amount() == 0 {
                return Err(invalid(tx, "malformed reward".to_string()));
            }
        } else {
            TransactionValidator::validate(tx).map_err(|e| invalid(tx, e.to_string()))?;
        }
    }
    if rewards > 1 {
        return Err(ChainIntegrityError::InvalidTransaction {
            block: block.index(),
            tx: String::new(),
            reason: "more than one reward".to_string(),
        });
    }
    Ok(())
}
