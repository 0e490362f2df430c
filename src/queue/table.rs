// TransactionQueue - Durable table of pending transactions
//
// The whole table lives under one store key. Every mutation is a single
// atomic read-modify-write through KvStore::update, so concurrent writers
// (sync engine, peer relays, the user) never lose each other's changes.

use crate::clock::{days_to_millis, now_millis};
use crate::crypto::{
    Cipher, DecryptionError, EncryptionError, SecretMaterial, SymmetricKey,
};
use crate::queue::{Origin, PendingTransaction, Priority, QueueSummary, TransactionStatus};
use crate::storage::{keys, KvStore, StoreError};
use crate::tx::{CodecError, Transaction, TransactionCodec};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default number of failed attempts before an entry turns terminal
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue entry not found: {0}")]
    NotFound(String),

    #[error("Queue entry already exists: {0}")]
    Duplicate(String),

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Queue entry {0} does not hold the transaction it claims")]
    Corrupted(String),

    #[error("Queue table encoding error: {0}")]
    Encoding(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct TransactionQueue {
    store: Arc<dyn KvStore>,
    max_retries: u32,
}

impl TransactionQueue {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Failed attempts allowed before an entry needs `requeue`
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    // ========================================================================
    // ENQUEUE
    // ========================================================================

    /// Encrypt a locally authored transaction and store it as pending.
    /// The amount is held against the available balance until it settles.
    pub fn enqueue(
        &self,
        tx: &Transaction,
        secret: &SecretMaterial,
        priority: Priority,
    ) -> Result<String, QueueError> {
        self.insert(tx, &secret.storage_key(), priority, Origin::Local, tx.amount())
    }

    /// Store a transaction relayed by a peer. Incoming value is never held.
    pub fn enqueue_received(
        &self,
        tx: &Transaction,
        secret: &SecretMaterial,
        origin: Origin,
    ) -> Result<String, QueueError> {
        self.insert(tx, &secret.storage_key(), Priority::Medium, origin, 0)
    }

    fn insert(
        &self,
        tx: &Transaction,
        key: &SymmetricKey,
        priority: Priority,
        origin: Origin,
        hold: u64,
    ) -> Result<String, QueueError> {
        let plaintext = TransactionCodec::encode(tx)?;
        let envelope = Cipher::encrypt(&plaintext, key)?;
        let entry = PendingTransaction {
            id: tx.id().to_string(),
            envelope,
            status: TransactionStatus::Pending,
            retry_count: 0,
            last_attempt: None,
            priority,
            created_at: now_millis(),
            completed_at: None,
            hold,
            origin,
            last_error: None,
            terminal: false,
        };

        let id = entry.id.clone();
        self.modify(|entries| {
            if entries.iter().any(|e| e.id == entry.id) {
                return Err(QueueError::Duplicate(entry.id.clone()));
            }
            entries.push(entry.clone());
            Ok(())
        })?;

        debug!(id = %id, hold, "Transaction queued");
        Ok(id)
    }

    // ========================================================================
    // STATUS TRANSITIONS
    // ========================================================================

    pub fn mark_syncing(&self, id: &str) -> Result<(), QueueError> {
        let now = now_millis();
        self.transition(id, TransactionStatus::Syncing, |entry| {
            entry.last_attempt = Some(now);
        })
    }

    pub fn mark_completed(&self, id: &str) -> Result<(), QueueError> {
        let now = now_millis();
        self.transition(id, TransactionStatus::Completed, |entry| {
            entry.completed_at = Some(now);
            entry.last_error = None;
        })
    }

    /// Record a failed attempt. Returns true when the entry has now used up
    /// its retries and turned terminal.
    pub fn mark_failed(&self, id: &str, reason: &str) -> Result<bool, QueueError> {
        let max_retries = self.max_retries;
        let mut terminal = false;
        self.transition(id, TransactionStatus::Failed, |entry| {
            entry.retry_count += 1;
            entry.last_error = Some(reason.to_string());
            entry.terminal = entry.retry_count >= max_retries;
            terminal = entry.terminal;
        })?;
        if terminal {
            info!(id, reason, "Queue entry failed terminally");
        }
        Ok(terminal)
    }

    /// Give a terminal entry a fresh retry budget
    pub fn requeue(&self, id: &str) -> Result<(), QueueError> {
        self.modify(|entries| {
            let entry = find_mut(entries, id)?;
            if entry.status != TransactionStatus::Failed {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: entry.status,
                    to: TransactionStatus::Failed,
                });
            }
            entry.terminal = false;
            entry.retry_count = 0;
            Ok(())
        })
    }

    /// Roll back entries left `Syncing` by a cycle that never finished.
    /// Each returns to where that attempt found it: failed if it had failed
    /// before, pending otherwise. The attempt is not counted. Call only
    /// while no sync cycle is running.
    pub fn recover_interrupted(&self) -> Result<Vec<String>, QueueError> {
        let recovered = self.modify(|entries| {
            let mut recovered = Vec::new();
            for entry in entries
                .iter_mut()
                .filter(|e| e.status == TransactionStatus::Syncing)
            {
                entry.status = if entry.last_error.is_some() {
                    TransactionStatus::Failed
                } else {
                    TransactionStatus::Pending
                };
                recovered.push(entry.id.clone());
            }
            Ok(recovered)
        })?;
        if !recovered.is_empty() {
            warn!(count = recovered.len(), "Recovered interrupted queue entries");
        }
        Ok(recovered)
    }

    fn transition(
        &self,
        id: &str,
        next: TransactionStatus,
        mut apply: impl FnMut(&mut PendingTransaction),
    ) -> Result<(), QueueError> {
        self.modify(|entries| {
            let entry = find_mut(entries, id)?;
            if !entry.status.can_transition_to(next) {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: entry.status,
                    to: next,
                });
            }
            entry.status = next;
            apply(entry);
            Ok(())
        })
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn get(&self, id: &str) -> Result<Option<PendingTransaction>, QueueError> {
        Ok(self.load()?.into_iter().find(|e| e.id == id))
    }

    /// Entries waiting for their first sync, in drain order
    pub fn list_pending(&self) -> Result<Vec<PendingTransaction>, QueueError> {
        let mut pending: Vec<_> = self
            .load()?
            .into_iter()
            .filter(|e| e.status == TransactionStatus::Pending)
            .collect();
        pending.sort_by_key(|e| (e.priority, e.created_at));
        Ok(pending)
    }

    /// Failed entries, terminal ones included
    pub fn list_failed(&self) -> Result<Vec<PendingTransaction>, QueueError> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|e| e.status == TransactionStatus::Failed)
            .collect())
    }

    pub fn list_all(&self) -> Result<Vec<PendingTransaction>, QueueError> {
        self.load()
    }

    /// Sum of holds on entries that have neither settled nor failed terminally
    pub fn outstanding_holds(&self) -> Result<u64, QueueError> {
        Ok(self
            .load()?
            .iter()
            .filter(|e| e.is_holding())
            .map(|e| e.hold)
            .sum())
    }

    pub fn summary(&self) -> Result<QueueSummary, QueueError> {
        let mut summary = QueueSummary::default();
        for entry in self.load()? {
            summary.total += 1;
            match entry.status {
                TransactionStatus::Pending => summary.pending += 1,
                TransactionStatus::Syncing => summary.syncing += 1,
                TransactionStatus::Failed => {
                    summary.failed += 1;
                    if entry.terminal {
                        summary.terminal += 1;
                    }
                }
                TransactionStatus::Completed => {
                    summary.completed += 1;
                    summary.last_completed_at = summary.last_completed_at.max(entry.completed_at);
                }
            }
        }
        Ok(summary)
    }

    /// Decrypt an entry and check it holds the transaction it claims
    pub fn decrypt_entry(
        entry: &PendingTransaction,
        secret: &SecretMaterial,
    ) -> Result<Transaction, QueueError> {
        let plaintext = Cipher::decrypt(&entry.envelope, &secret.storage_key())?;
        let tx = TransactionCodec::decode(&plaintext)?;
        if tx.id() != entry.id {
            return Err(QueueError::Corrupted(entry.id.clone()));
        }
        Ok(tx)
    }

    // ========================================================================
    // RETENTION
    // ========================================================================

    /// Delete completed entries older than the retention window
    pub fn cleanup(&self, retention_days: u32) -> Result<usize, QueueError> {
        self.cleanup_at(retention_days, now_millis())
    }

    /// Same as [`TransactionQueue::cleanup`] with an explicit clock
    pub fn cleanup_at(&self, retention_days: u32, now: i64) -> Result<usize, QueueError> {
        let cutoff = now - days_to_millis(retention_days);
        let removed = self.modify(|entries| {
            let before = entries.len();
            entries.retain(|e| {
                e.status != TransactionStatus::Completed
                    || e.completed_at.unwrap_or(e.created_at) >= cutoff
            });
            Ok(before - entries.len())
        })?;
        if removed > 0 {
            info!(removed, retention_days, "Cleaned up completed queue entries");
        }
        Ok(removed)
    }

    // ========================================================================
    // TABLE ACCESS
    // ========================================================================

    fn load(&self) -> Result<Vec<PendingTransaction>, QueueError> {
        decode_table(self.store.get(keys::QUEUE)?.as_deref())
    }

    /// Atomic read-modify-write of the whole table. `f` may run more than
    /// once under contention; only the last run's result is returned.
    fn modify<R>(
        &self,
        mut f: impl FnMut(&mut Vec<PendingTransaction>) -> Result<R, QueueError>,
    ) -> Result<R, QueueError> {
        let mut outcome: Option<Result<R, QueueError>> = None;

        self.store.update(keys::QUEUE, &mut |current| {
            let unchanged = current.map(<[u8]>::to_vec);
            let mut entries = match decode_table(current) {
                Ok(entries) => entries,
                Err(e) => {
                    outcome = Some(Err(e));
                    return unchanged;
                }
            };
            match f(&mut entries).and_then(|r| encode_table(&entries).map(|bytes| (r, bytes))) {
                Ok((r, bytes)) => {
                    outcome = Some(Ok(r));
                    Some(bytes)
                }
                Err(e) => {
                    outcome = Some(Err(e));
                    unchanged
                }
            }
        })?;

        outcome.unwrap_or_else(|| Err(QueueError::Encoding("update did not run".to_string())))
    }
}

fn find_mut<'a>(
    entries: &'a mut [PendingTransaction],
    id: &str,
) -> Result<&'a mut PendingTransaction, QueueError> {
    entries
        .iter_mut()
        .find(|e| e.id == id)
        .ok_or_else(|| QueueError::NotFound(id.to_string()))
}

fn decode_table(bytes: Option<&[u8]>) -> Result<Vec<PendingTransaction>, QueueError> {
    match bytes {
        Some(bytes) => postcard::from_bytes(bytes).map_err(|e| QueueError::Encoding(e.to_string())),
        None => Ok(Vec::new()),
    }
}

fn encode_table(entries: &[PendingTransaction]) -> Result<Vec<u8>, QueueError> {
    postcard::to_allocvec(entries).map_err(|e| QueueError::Encoding(e.to_string()))
}
