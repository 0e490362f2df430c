// Ledger module - THE LOCAL CHAIN
// Append-only blocks sealed by proof-of-work, balances and snapshot import

mod block;
mod chain;
mod merkle;
mod pow;
mod shared;

pub use block::{Block, GENESIS_PREVIOUS_HASH};
pub use chain::{ChainIntegrityError, ChainSnapshot, Ledger, LedgerConfig, LedgerError};
pub use merkle::{merkle_root, EMPTY_MERKLE_ROOT};
pub use pow::{meets_difficulty, BlockTemplate, CancelFlag, MineOutcome, MAX_DIFFICULTY};
pub use shared::{seal_pending, SharedLedger};
