// Storage module - PERSISTENCE
// Key-value collaborator used for the wallet record, queue table and chain snapshots

mod memory;
mod store;

pub use memory::MemoryStore;
pub use store::{keys, load, save, KvStore, SledStore, StorageStats, StoreError};
