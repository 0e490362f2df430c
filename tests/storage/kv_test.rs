// Key-Value Store Tests
// Same behavior expected from the sled and in-memory stores

use meshwallet::ledger::{Ledger, LedgerConfig};
use meshwallet::storage::{keys, load, save, KvStore, MemoryStore, SledStore, StoreError};
use tempfile::TempDir;

fn with_each_store(check: impl Fn(&dyn KvStore)) {
    check(&MemoryStore::new());

    let dir = TempDir::new().unwrap();
    let sled = SledStore::open(dir.path()).unwrap();
    check(&sled);
}

// ============================================================================
// BASIC OPERATIONS
// ============================================================================

#[test]
fn test_get_missing_is_none() {
    with_each_store(|store| {
        assert_eq!(store.get("absent").unwrap(), None);
    });
}

#[test]
fn test_set_get_remove() {
    with_each_store(|store| {
        store.set("k", b"v1").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v1".to_vec()));

        store.set("k", b"v2").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v2".to_vec()));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);

        // Removing twice is fine
        store.remove("k").unwrap();
    });
}

#[test]
fn test_update_read_modify_write() {
    with_each_store(|store| {
        let mut append = |current: Option<&[u8]>| {
            let mut next = current.map(<[u8]>::to_vec).unwrap_or_default();
            next.push(next.len() as u8);
            Some(next)
        };
        store.update("list", &mut append).unwrap();
        store.update("list", &mut append).unwrap();
        let last = store.update("list", &mut append).unwrap();

        assert_eq!(last, Some(vec![0, 1, 2]));
        assert_eq!(store.get("list").unwrap(), Some(vec![0, 1, 2]));
    });
}

#[test]
fn test_update_returning_none_deletes() {
    with_each_store(|store| {
        store.set("gone", b"x").unwrap();
        let result = store.update("gone", &mut |_| None).unwrap();

        assert_eq!(result, None);
        assert_eq!(store.get("gone").unwrap(), None);
    });
}

// ============================================================================
// TYPED BLOBS
// ============================================================================

#[test]
fn test_save_load_chain_snapshot() {
    with_each_store(|store| {
        let mut ledger = Ledger::new(LedgerConfig::new().with_difficulty(0));
        ledger
            .seal_block(&meshwallet::crypto::Keypair::generate().address())
            .unwrap();
        let snapshot = ledger.export_snapshot();

        save(store, keys::CHAIN, &snapshot).unwrap();
        let loaded: Option<meshwallet::ledger::ChainSnapshot> = load(store, keys::CHAIN).unwrap();
        assert_eq!(loaded, Some(snapshot));
    });
}

#[test]
fn test_load_garbage_fails_to_decode() {
    with_each_store(|store| {
        store.set(keys::CHAIN, &[0xff, 0xff, 0xff]).unwrap();
        let result: Result<Option<meshwallet::ledger::ChainSnapshot>, _> = load(store, keys::CHAIN);
        assert!(matches!(result, Err(StoreError::DeserializationFailed(_))));
    });
}

// ============================================================================
// SLED DURABILITY
// ============================================================================

#[test]
fn test_sled_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = SledStore::open(dir.path()).unwrap();
        store.set(keys::WALLET_RECORD, b"record").unwrap();
        store.flush().unwrap();
    }

    let store = SledStore::open(dir.path()).unwrap();
    assert_eq!(
        store.get(keys::WALLET_RECORD).unwrap(),
        Some(b"record".to_vec())
    );
    assert_eq!(store.stats().unwrap().key_count, 1);
}
