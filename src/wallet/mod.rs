// Wallet module - THE RUNTIME
// Owns the ledger, queue, sync engine and record; hands out the peer network

mod config;
mod record;
mod runtime;
mod session;

pub use config::WalletConfig;
pub use record::WalletRecord;
pub use runtime::{HistoryEntry, HistorySource, Wallet, WalletError};
pub use session::{SessionProvider, StaticSession};
