use crate::crypto::{Address, Envelope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a queue entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Syncing,
    Failed,
    Completed,
}

impl TransactionStatus {
    /// Forward-only transitions; `Failed -> Syncing` is a retry
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Syncing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Syncing, Completed)
                | (Syncing, Failed)
                | (Failed, Syncing)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Syncing => "syncing",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Drain order; higher priority entries sync first
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// Where a queue entry came from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Authored by this wallet
    Local,
    /// Relayed by a trusted peer
    Peer(Address),
}

/// An encrypted transaction plus its sync bookkeeping
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub(crate) id: String,
    pub(crate) envelope: Envelope,
    pub(crate) status: TransactionStatus,
    pub(crate) retry_count: u32,
    pub(crate) last_attempt: Option<i64>,
    pub(crate) priority: Priority,
    pub(crate) created_at: i64,
    pub(crate) completed_at: Option<i64>,
    /// Amount withheld from the available balance until the entry settles
    pub(crate) hold: u64,
    pub(crate) origin: Origin,
    pub(crate) last_error: Option<String>,
    /// Retries exhausted; needs `requeue` before it syncs again
    pub(crate) terminal: bool,
}

impl PendingTransaction {
    /// Transaction id of the enclosed transaction
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_attempt(&self) -> Option<i64> {
        self.last_attempt
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<i64> {
        self.completed_at
    }

    pub fn hold(&self) -> u64 {
        self.hold
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Hold still counts against the available balance
    pub fn is_holding(&self) -> bool {
        self.hold > 0 && self.status != TransactionStatus::Completed && !self.terminal
    }
}

/// Counts per status
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub terminal: usize,
    pub completed: usize,
    pub total: usize,
    pub last_completed_at: Option<i64>,
}
