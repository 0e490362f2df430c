// Meshwallet - Offline-first wallet with a local proof-of-work ledger
//
// Transactions are signed locally, queued encrypted while offline, relayed
// directly to trusted peers, and sealed into the local chain by the sync
// engine once connectivity returns.

pub mod clock;
pub mod crypto;
pub mod ledger;
pub mod network;
pub mod queue;
pub mod storage;
pub mod sync;
pub mod tx;
pub mod wallet;

pub use crypto::{Address, Keypair, SecretMaterial};
pub use ledger::{Block, Ledger, LedgerConfig};
pub use network::{NetworkConfig, PeerNetwork};
pub use queue::{PendingTransaction, TransactionQueue, TransactionStatus};
pub use sync::{SyncConfig, SyncEngine, SyncReport};
pub use tx::{Transaction, TransactionBuilder};
pub use wallet::{Wallet, WalletConfig, WalletError};
