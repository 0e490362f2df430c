// Sync module - QUEUE TO LEDGER RECONCILIATION
// Single-flight draining of queued transactions into sealed blocks

mod engine;

pub use engine::{SyncConfig, SyncEngine, SyncError, SyncReport};
