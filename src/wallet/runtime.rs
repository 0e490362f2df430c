// Wallet runtime
//
// One Wallet per identity. It owns the shared ledger, the queue and the
// sync engine, persists the chain and the unsealed pending pool whenever
// either changes, and builds the peer network on request. The secret is fetched from the session
// collaborator each time it is needed and never cached here.

use crate::crypto::{Address, Keypair, KeypairError, SecretMaterial};
use crate::ledger::{
    seal_pending, Block, CancelFlag, ChainIntegrityError, ChainSnapshot, Ledger, LedgerError,
    SharedLedger,
};
use crate::network::PeerNetwork;
use crate::queue::{Priority, QueueError, QueueSummary, TransactionQueue, TransactionStatus};
use crate::storage::{keys, load, save, KvStore, StoreError};
use crate::sync::{SyncEngine, SyncError, SyncReport};
use crate::tx::{BuilderError, Transaction, TransactionBuilder, TransactionValidator, ValidationError};
use crate::wallet::{SessionProvider, WalletConfig, WalletRecord};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Wallet is locked")]
    Locked,

    #[error("No wallet record found; run init first")]
    NotInitialized,

    #[error("A wallet record already exists")]
    AlreadyInitialized,

    #[error("Session secret does not belong to wallet {0}")]
    IdentityMismatch(String),

    #[error("Stored wallet record is inconsistent")]
    CorruptRecord,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Integrity(#[from] ChainIntegrityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Keypair(#[from] KeypairError),
}

// ============================================================================
// HISTORY
// ============================================================================

/// Where a history entry was found
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistorySource {
    /// Settled in the block at this index
    Block(u64),
    /// Submitted online, waiting for the next seal
    Unsealed,
    /// Still in the local queue
    Queue(TransactionStatus),
}

#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub transaction: Transaction,
    pub source: HistorySource,
}

// ============================================================================
// WALLET
// ============================================================================

pub struct Wallet {
    address: Address,
    config: WalletConfig,
    store: Arc<dyn KvStore>,
    session: Arc<dyn SessionProvider>,
    ledger: SharedLedger,
    queue: TransactionQueue,
    engine: SyncEngine,
}

impl Wallet {
    /// Generate a new identity and persist its record
    pub fn create(store: &dyn KvStore) -> Result<WalletRecord, WalletError> {
        Self::create_from_secret(store, SecretMaterial::generate())
    }

    /// Persist a record for an existing secret (restore from backup)
    pub fn create_from_secret(
        store: &dyn KvStore,
        secret: SecretMaterial,
    ) -> Result<WalletRecord, WalletError> {
        if store.get(keys::WALLET_RECORD)?.is_some() {
            return Err(WalletError::AlreadyInitialized);
        }
        let record = WalletRecord::from_secret(secret);
        save(store, keys::WALLET_RECORD, &record)?;
        info!(address = %record.address, "Wallet created");
        Ok(record)
    }

    /// Open the wallet stored in `store`, restoring its persisted chain
    pub fn open(
        store: Arc<dyn KvStore>,
        session: Arc<dyn SessionProvider>,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        config.validate()?;

        let record: WalletRecord =
            load(store.as_ref(), keys::WALLET_RECORD)?.ok_or(WalletError::NotInitialized)?;
        if !record.is_consistent() {
            return Err(WalletError::CorruptRecord);
        }

        let mut ledger = match load::<ChainSnapshot>(store.as_ref(), keys::CHAIN)? {
            Some(snapshot) => Ledger::from_snapshot(config.ledger.clone(), snapshot)?,
            None => Ledger::new(config.ledger.clone()),
        };
        let pool: Vec<Transaction> =
            load(store.as_ref(), keys::PENDING_POOL)?.unwrap_or_default();
        for tx in pool {
            let id = tx.id().to_string();
            match ledger.submit_pending(tx) {
                Ok(()) => {}
                Err(ValidationError::Duplicate(_)) => {
                    debug!(id = %id, "Saved pending transaction already sealed")
                }
                Err(e) => warn!(id = %id, error = %e, "Dropped invalid pending transaction"),
            }
        }
        let ledger: SharedLedger = Arc::new(RwLock::new(ledger));
        let queue =
            TransactionQueue::new(Arc::clone(&store)).with_max_retries(config.sync.max_retries);
        // No cycle can be running yet, so anything still syncing was cut off
        queue.recover_interrupted()?;
        let engine = SyncEngine::new(
            Arc::clone(&ledger),
            queue.clone(),
            record.address.clone(),
            config.sync.clone(),
        );

        debug!(address = %record.address, "Wallet opened");
        Ok(Self {
            address: record.address,
            config,
            store,
            session,
            ledger,
            queue,
            engine,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn ledger(&self) -> SharedLedger {
        Arc::clone(&self.ledger)
    }

    pub fn queue(&self) -> &TransactionQueue {
        &self.queue
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Stored record, including the cached balance
    pub fn record(&self) -> Result<WalletRecord, WalletError> {
        load(self.store.as_ref(), keys::WALLET_RECORD)?.ok_or(WalletError::NotInitialized)
    }

    fn secret(&self) -> Result<SecretMaterial, WalletError> {
        if !self.session.is_unlocked() {
            return Err(WalletError::Locked);
        }
        self.session.secret().ok_or(WalletError::Locked)
    }

    fn keypair(&self) -> Result<Keypair, WalletError> {
        let keypair = Keypair::from_secret(&self.secret()?);
        if keypair.address() != self.address {
            return Err(WalletError::IdentityMismatch(self.address.to_string()));
        }
        Ok(keypair)
    }

    // ========================================================================
    // BALANCES
    // ========================================================================

    /// Net balance over sealed blocks only
    pub async fn ledger_balance(&self) -> i64 {
        self.ledger.read().await.balance_of(&self.address)
    }

    /// Ledger balance minus unsealed outgoing submissions and queue holds
    pub async fn available_balance(&self) -> Result<i64, WalletError> {
        let (settled, unsealed) = {
            let ledger = self.ledger.read().await;
            let unsealed: u64 = ledger
                .pending()
                .iter()
                .filter(|tx| tx.from() == &self.address)
                .map(|tx| tx.amount())
                .sum();
            (ledger.balance_of(&self.address), unsealed)
        };
        let holds = self.queue.outstanding_holds()?;
        Ok(settled
            .saturating_sub(clamp_i64(unsealed))
            .saturating_sub(clamp_i64(holds)))
    }

    async fn refresh_balance(&self) -> Result<i64, WalletError> {
        let available = self.available_balance().await?;
        let mut record = self.record()?;
        if record.balance != available {
            record.balance = available;
            save(self.store.as_ref(), keys::WALLET_RECORD, &record)?;
        }
        Ok(available)
    }

    // ========================================================================
    // TRANSFERS
    // ========================================================================

    /// Author and sign a transfer; nothing is submitted yet
    pub fn new_transfer(
        &self,
        to: &Address,
        amount: u64,
        note: Option<&str>,
    ) -> Result<Transaction, WalletError> {
        let keypair = self.keypair()?;
        let mut builder = TransactionBuilder::new()
            .sender(&keypair)
            .recipient(to.clone())
            .amount(amount);
        if let Some(note) = note {
            builder = builder.note(note);
        }
        Ok(builder.build()?)
    }

    /// Connected path: straight into the ledger's pending pool
    pub async fn submit_online(&self, tx: Transaction) -> Result<(), WalletError> {
        let available = self.available_balance().await?;
        TransactionValidator::validate_outgoing(&tx, &self.address, available)?;
        let id = tx.id().to_string();
        self.ledger.write().await.submit_pending(tx)?;
        self.save_pending().await?;
        self.refresh_balance().await?;
        info!(id = %id, "Transaction submitted to ledger");
        Ok(())
    }

    /// Offline path: encrypt into the queue, holding the amount
    pub async fn queue_offline(
        &self,
        tx: &Transaction,
        priority: Priority,
    ) -> Result<String, WalletError> {
        let secret = self.secret()?;
        let available = self.available_balance().await?;
        TransactionValidator::validate_outgoing(tx, &self.address, available)?;
        let id = self.queue.enqueue(tx, &secret, priority)?;
        self.refresh_balance().await?;
        info!(id = %id, amount = tx.amount(), "Transaction queued offline");
        Ok(id)
    }

    // ========================================================================
    // SYNC
    // ========================================================================

    pub async fn sync(&self) -> Result<SyncReport, WalletError> {
        let secret = self.secret()?;
        let report = self.engine.sync(&secret).await?;
        self.after_cycle(&report).await?;
        Ok(report)
    }

    pub async fn retry(&self, ids: &[String]) -> Result<SyncReport, WalletError> {
        let secret = self.secret()?;
        let report = self.engine.retry(&secret, ids).await?;
        self.after_cycle(&report).await?;
        Ok(report)
    }

    pub async fn retry_all_failed(&self) -> Result<SyncReport, WalletError> {
        let secret = self.secret()?;
        let report = self.engine.retry_all_failed(&secret).await?;
        self.after_cycle(&report).await?;
        Ok(report)
    }

    /// Reset a terminally failed entry so it can be retried
    pub async fn requeue(&self, id: &str) -> Result<(), WalletError> {
        self.queue.requeue(id)?;
        self.refresh_balance().await?;
        Ok(())
    }

    /// Seal whatever the ledger's pending pool holds, plus the reward,
    /// outside a sync cycle. Works on an empty pool.
    pub async fn mine(&self) -> Result<Block, WalletError> {
        let block = seal_pending(&self.ledger, &self.address, &CancelFlag::new())
            .await?
            .ok_or_else(|| LedgerError::Worker("mining cancelled".to_string()))?;
        self.save_chain().await?;
        self.refresh_balance().await?;
        info!(index = block.index(), hash = block.hash(), "Mined block");
        Ok(block)
    }

    pub fn cleanup(&self) -> Result<usize, WalletError> {
        Ok(self.engine.cleanup()?)
    }

    /// Completed entries may sit unsealed in the pool after a cancelled or
    /// failed seal, so the pool is saved even when no block was sealed
    async fn after_cycle(&self, report: &SyncReport) -> Result<(), WalletError> {
        if report.block.is_some() {
            self.save_chain().await?;
        } else {
            self.save_pending().await?;
        }
        self.refresh_balance().await?;
        Ok(())
    }

    /// Run a sync on every offline to online transition of `online`
    pub fn spawn_auto_sync(self: &Arc<Self>, mut online: watch::Receiver<bool>) -> JoinHandle<()> {
        let wallet = Arc::clone(self);
        tokio::spawn(async move {
            let mut was_online = *online.borrow_and_update();
            while online.changed().await.is_ok() {
                let now_online = *online.borrow_and_update();
                if now_online && !was_online {
                    match wallet.sync().await {
                        Ok(report) => info!(
                            succeeded = report.success_count,
                            failed = report.failure_count,
                            "Auto-sync finished"
                        ),
                        Err(WalletError::Sync(SyncError::Busy)) => {
                            debug!("Auto-sync skipped, sync already running")
                        }
                        Err(e) => warn!(error = %e, "Auto-sync failed"),
                    }
                }
                was_online = now_online;
            }
        })
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn queue_summary(&self) -> Result<QueueSummary, WalletError> {
        Ok(self.queue.summary()?)
    }

    /// Ledger and queue transactions touching this wallet, newest first
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, WalletError> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        {
            let ledger = self.ledger.read().await;
            for (block, tx) in ledger.transactions_for(&self.address) {
                seen.insert(tx.id().to_string());
                entries.push(HistoryEntry {
                    transaction: tx.clone(),
                    source: HistorySource::Block(block.index()),
                });
            }
            for tx in ledger.pending() {
                if tx.from() == &self.address || tx.to() == &self.address {
                    seen.insert(tx.id().to_string());
                    entries.push(HistoryEntry {
                        transaction: tx.clone(),
                        source: HistorySource::Unsealed,
                    });
                }
            }
        }

        let secret = self.secret()?;
        for entry in self.queue.list_all()? {
            if seen.contains(entry.id()) {
                continue;
            }
            match TransactionQueue::decrypt_entry(&entry, &secret) {
                Ok(tx) => entries.push(HistoryEntry {
                    transaction: tx,
                    source: HistorySource::Queue(entry.status()),
                }),
                Err(e) => warn!(id = entry.id(), error = %e, "Unreadable queue entry"),
            }
        }

        entries.sort_by(|a, b| b.transaction.timestamp().cmp(&a.transaction.timestamp()));
        Ok(entries)
    }

    // ========================================================================
    // CHAIN
    // ========================================================================

    pub async fn export_chain(&self) -> ChainSnapshot {
        self.ledger.read().await.export_snapshot()
    }

    /// Persist the current chain under `ledger:chain`, and the pending pool
    /// with it
    pub async fn save_chain(&self) -> Result<(), WalletError> {
        let (snapshot, pool) = {
            let ledger = self.ledger.read().await;
            (ledger.export_snapshot(), ledger.pending().to_vec())
        };
        save(self.store.as_ref(), keys::CHAIN, &snapshot)?;
        save(self.store.as_ref(), keys::PENDING_POOL, &pool)?;
        debug!(blocks = snapshot.len(), pending = pool.len(), "Chain saved");
        Ok(())
    }

    /// Persist only the unsealed pool under `ledger:pending`
    async fn save_pending(&self) -> Result<(), WalletError> {
        let pool = self.ledger.read().await.pending().to_vec();
        save(self.store.as_ref(), keys::PENDING_POOL, &pool)?;
        debug!(pending = pool.len(), "Pending pool saved");
        Ok(())
    }

    /// Replace the chain with a validated candidate; all or nothing
    pub async fn import_chain(&self, snapshot: ChainSnapshot) -> Result<(), WalletError> {
        self.ledger.write().await.import_snapshot(snapshot)?;
        self.save_chain().await?;
        self.refresh_balance().await?;
        Ok(())
    }

    /// Import a peer's chain only if it is valid and strictly longer.
    /// Returns whether the local chain was replaced.
    pub async fn adopt_chain(&self, snapshot: ChainSnapshot) -> Result<bool, WalletError> {
        {
            let mut ledger = self.ledger.write().await;
            if snapshot.len() <= ledger.len() {
                debug!(
                    local = ledger.len(),
                    candidate = snapshot.len(),
                    "Candidate chain not longer, keeping local chain"
                );
                return Ok(false);
            }
            ledger.import_snapshot(snapshot)?;
        }
        self.save_chain().await?;
        self.refresh_balance().await?;
        let height = self.ledger.read().await.height();
        info!(height, "Adopted peer chain");
        Ok(true)
    }

    pub async fn verify_chain(&self) -> Result<(), WalletError> {
        Ok(self.ledger.read().await.validate()?)
    }

    // ========================================================================
    // NETWORK
    // ========================================================================

    /// Peer network sharing this wallet's ledger and queue. Attach
    /// transports with `with_transport` before starting it.
    pub fn peer_network(&self) -> Result<PeerNetwork, WalletError> {
        Ok(PeerNetwork::new(
            self.keypair()?,
            Arc::clone(&self.ledger),
            self.queue.clone(),
            self.config.network.clone(),
        ))
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
