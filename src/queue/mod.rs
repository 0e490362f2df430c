// Queue module - OFFLINE HOLDING AREA
// Encrypted transactions waiting to reach the ledger, with per-entry status

mod entry;
mod table;

pub use entry::{Origin, PendingTransaction, Priority, QueueSummary, TransactionStatus};
pub use table::{QueueError, TransactionQueue};
