// SyncEngine - Drains the transaction queue into the ledger
//
// At most one sync or retry runs at a time; a concurrent call gets
// SyncError::Busy immediately. A bad entry is recorded and skipped, never
// aborting the batch. One block is sealed per cycle. Each cycle first rolls
// back entries a dropped or crashed cycle left mid-sync.

use crate::crypto::{Address, SecretMaterial};
use crate::ledger::{seal_pending, Block, CancelFlag, LedgerError, SharedLedger};
use crate::queue::{PendingTransaction, QueueError, TransactionQueue, TransactionStatus};
use crate::tx::TransactionValidator;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("A sync is already running")]
    Busy,

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration for the sync engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Failed attempts before an entry turns terminal
    pub max_retries: u32,
    /// Days completed entries are kept before cleanup
    pub retention_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retention_days: 30,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.max_retries == 0 {
            return Err(SyncError::InvalidConfig(
                "max_retries must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// Outcome of one sync or retry cycle
#[derive(Clone, Debug, Default)]
pub struct SyncReport {
    pub success_count: usize,
    pub failure_count: usize,
    /// `"<id>: <reason>"` per failed entry, plus sealing problems
    pub errors: Vec<String>,
    /// Entries skipped because their retries are exhausted
    pub skipped: Vec<String>,
    /// Block sealed by this cycle, if any
    pub block: Option<Block>,
}

impl SyncReport {
    fn fail(&mut self, id: &str, reason: impl std::fmt::Display) {
        self.failure_count += 1;
        self.errors.push(format!("{id}: {reason}"));
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// The running cycle's cancel flag; None while idle
type CycleSlot = Mutex<Option<CancelFlag>>;

fn lock_slot(slot: &CycleSlot) -> MutexGuard<'_, Option<CancelFlag>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the single-flight slot and empties it when dropped
struct FlightGuard<'a>(&'a CycleSlot);

impl<'a> FlightGuard<'a> {
    fn acquire(slot: &'a CycleSlot) -> Option<(Self, CancelFlag)> {
        let mut current = lock_slot(slot);
        if current.is_some() {
            return None;
        }
        let cancel = CancelFlag::new();
        *current = Some(cancel.clone());
        Some((Self(slot), cancel))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        *lock_slot(self.0) = None;
    }
}

pub struct SyncEngine {
    ledger: SharedLedger,
    queue: TransactionQueue,
    config: SyncConfig,
    reward_address: Address,
    cycle: CycleSlot,
}

impl SyncEngine {
    pub fn new(
        ledger: SharedLedger,
        queue: TransactionQueue,
        reward_address: Address,
        config: SyncConfig,
    ) -> Self {
        Self {
            ledger,
            queue,
            config,
            reward_address,
            cycle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_syncing(&self) -> bool {
        lock_slot(&self.cycle).is_some()
    }

    /// Cancel sealing for the running cycle. A search already under way is
    /// aborted; a cycle still processing entries skips sealing entirely.
    /// Either way its transactions stay in the ledger's pending pool for
    /// the next cycle. Returns false when no cycle is running.
    pub fn cancel_sealing(&self) -> bool {
        match lock_slot(&self.cycle).as_ref() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Claim the single-flight slot and roll back entries an earlier cycle
    /// never finished
    fn begin_cycle(&self) -> Result<(FlightGuard<'_>, CancelFlag), SyncError> {
        let (guard, cancel) = FlightGuard::acquire(&self.cycle).ok_or(SyncError::Busy)?;
        self.queue.recover_interrupted()?;
        Ok((guard, cancel))
    }

    /// Drain every pending queue entry into the ledger and seal one block
    pub async fn sync(&self, secret: &SecretMaterial) -> Result<SyncReport, SyncError> {
        let (_guard, cancel) = self.begin_cycle()?;

        let entries = self.queue.list_pending()?;
        debug!(entries = entries.len(), "Sync started");

        let mut report = SyncReport::default();
        for entry in &entries {
            self.process_entry(entry, secret, &mut report).await;
        }
        self.seal(&mut report, &cancel).await;

        info!(
            succeeded = report.success_count,
            failed = report.failure_count,
            sealed = report.block.is_some(),
            "Sync finished"
        );
        Ok(report)
    }

    /// Re-run the given failed entries. Terminal entries are skipped.
    pub async fn retry(
        &self,
        secret: &SecretMaterial,
        ids: &[String],
    ) -> Result<SyncReport, SyncError> {
        let (_guard, cancel) = self.begin_cycle()?;

        let mut report = SyncReport::default();
        for id in ids {
            let entry = match self.queue.get(id)? {
                Some(entry) => entry,
                None => {
                    report.fail(id, QueueError::NotFound(id.clone()));
                    continue;
                }
            };
            if entry.status() != TransactionStatus::Failed {
                report.fail(id, format!("not failed (status {})", entry.status()));
                continue;
            }
            if entry.is_terminal() {
                report.skipped.push(id.clone());
                continue;
            }
            self.process_entry(&entry, secret, &mut report).await;
        }
        self.seal(&mut report, &cancel).await;

        info!(
            succeeded = report.success_count,
            failed = report.failure_count,
            skipped = report.skipped.len(),
            "Retry finished"
        );
        Ok(report)
    }

    /// Retry every failed entry that still has retries left
    pub async fn retry_all_failed(&self, secret: &SecretMaterial) -> Result<SyncReport, SyncError> {
        let ids: Vec<String> = self
            .queue
            .list_failed()?
            .into_iter()
            .filter(|e| !e.is_terminal())
            .map(|e| e.id().to_string())
            .collect();
        self.retry(secret, &ids).await
    }

    /// Purge completed entries older than the retention window
    pub fn cleanup(&self) -> Result<usize, SyncError> {
        Ok(self.queue.cleanup(self.config.retention_days)?)
    }

    async fn process_entry(
        &self,
        entry: &PendingTransaction,
        secret: &SecretMaterial,
        report: &mut SyncReport,
    ) {
        let id = entry.id();
        if let Err(e) = self.queue.mark_syncing(id) {
            report.fail(id, e);
            return;
        }

        let outcome = match TransactionQueue::decrypt_entry(entry, secret) {
            Ok(tx) => match TransactionValidator::validate(&tx) {
                Ok(()) => self
                    .ledger
                    .write()
                    .await
                    .submit_pending(tx)
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(()) => match self.queue.mark_completed(id) {
                Ok(()) => report.success_count += 1,
                Err(e) => report.fail(id, e),
            },
            Err(reason) => {
                warn!(id, reason = %reason, "Queue entry failed to sync");
                if let Err(e) = self.queue.mark_failed(id, &reason) {
                    warn!(id, error = %e, "Could not record sync failure");
                }
                report.fail(id, reason);
            }
        }
    }

    /// Seal once if this cycle (or an earlier online submission) left
    /// anything in the pending pool
    async fn seal(&self, report: &mut SyncReport, cancel: &CancelFlag) {
        let has_pending = !self.ledger.read().await.pending().is_empty();
        if report.success_count == 0 && !has_pending {
            return;
        }

        if cancel.is_cancelled() {
            debug!("Sealing cancelled before it started");
            return;
        }
        match seal_pending(&self.ledger, &self.reward_address, cancel).await {
            Ok(block) => report.block = block,
            Err(e) => {
                warn!(error = %e, "Sealing failed");
                report.errors.push(format!("sealing: {e}"));
            }
        }
    }
}
