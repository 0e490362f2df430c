// Chain Import Tests
// A candidate chain replaces the live one only if it validates in full

use meshwallet::crypto::Keypair;
use meshwallet::ledger::{Block, ChainIntegrityError, ChainSnapshot, Ledger, LedgerConfig};
use meshwallet::tx::{Transaction, TransactionBuilder};

fn config() -> LedgerConfig {
    LedgerConfig::new().with_difficulty(1).with_mining_reward(10)
}

/// Ledger with two sealed blocks, each holding one transfer
fn populated() -> (Ledger, Keypair) {
    let mut ledger = Ledger::new(config());
    let alice = Keypair::generate();
    let bob = Keypair::generate();
    for amount in [11, 22] {
        let tx = TransactionBuilder::new()
            .sender(&alice)
            .recipient(bob.address())
            .amount(amount)
            .build()
            .unwrap();
        ledger.submit_pending(tx).unwrap();
        ledger.seal_block(&alice.address()).unwrap();
    }
    (ledger, alice)
}

/// Swap block `index`'s first transaction for `tx`, leaving every stored
/// hash as it was
fn with_transaction(snapshot: &ChainSnapshot, index: usize, tx: Transaction) -> ChainSnapshot {
    let mut snapshot = snapshot.clone();
    let block = &snapshot.blocks[index];
    let mut transactions = block.transactions().to_vec();
    transactions[0] = tx;
    snapshot.blocks[index] = Block::from_parts(
        block.index(),
        block.timestamp(),
        transactions,
        block.previous_hash().to_string(),
        block.hash().to_string(),
        block.nonce(),
        block.merkle_root().to_string(),
    );
    snapshot
}

#[test]
fn test_import_valid_chain() {
    let (source, alice) = populated();
    let mut target = Ledger::new(config());

    target.import_snapshot(source.export_snapshot()).unwrap();
    assert_eq!(target.len(), 3);
    assert_eq!(target.balance_of(&alice.address()), source.balance_of(&alice.address()));
}

#[test]
fn test_altered_amount_rejected_and_live_chain_kept() {
    let (source, _) = populated();
    let (mut target, target_owner) = populated();
    let before = target.export_snapshot();
    let balance_before = target.balance_of(&target_owner.address());

    let snapshot = source.export_snapshot();
    let original = &snapshot.blocks[1].transactions()[0];
    let forged = Transaction::from_parts(
        Transaction::new(
            original.id().to_string(),
            original.from().clone(),
            original.to().clone(),
            original.amount() + 1,
            original.timestamp(),
            original.nonce(),
            original.note().map(str::to_string),
        ),
        original.sender_key().cloned(),
        original.signature().cloned(),
    );

    let result = target.import_snapshot(with_transaction(&snapshot, 1, forged));
    assert_eq!(result, Err(ChainIntegrityError::MerkleMismatch(1)));
    assert_eq!(target.export_snapshot(), before);
    assert_eq!(target.balance_of(&target_owner.address()), balance_before);
}

#[test]
fn test_rehashed_forgery_still_rejected() {
    // Even with merkle root and hash recomputed, the signature gives it away
    let (source, _) = populated();
    let snapshot = source.export_snapshot();
    let original = &snapshot.blocks[1].transactions()[0];
    let forged = Transaction::from_parts(
        Transaction::new(
            original.id().to_string(),
            original.from().clone(),
            original.to().clone(),
            original.amount() * 100,
            original.timestamp(),
            original.nonce(),
            None,
        ),
        original.sender_key().cloned(),
        original.signature().cloned(),
    );

    let mut forger = Ledger::new(config().with_difficulty(0));
    forger.submit_pending(forged).unwrap();
    forger.seal_block(&Keypair::generate().address()).unwrap();

    let mut target = Ledger::new(config().with_difficulty(0));
    assert!(matches!(
        target.import_snapshot(forger.export_snapshot()),
        Err(ChainIntegrityError::InvalidTransaction { block: 1, .. })
    ));
    assert_eq!(target.len(), 1);
}

#[test]
fn test_insufficient_work_rejected() {
    let mut easy = Ledger::new(config().with_difficulty(0));
    // Keep sealing until one block misses the target of the importer
    let miner = Keypair::generate().address();
    loop {
        let block = easy.seal_block(&miner).unwrap();
        if !block.hash().starts_with('0') {
            break;
        }
    }

    let mut strict = Ledger::new(config());
    assert!(matches!(
        strict.import_snapshot(easy.export_snapshot()),
        Err(ChainIntegrityError::InsufficientWork(_, 1))
    ));
}

#[test]
fn test_foreign_genesis_rejected() {
    let (source, _) = populated();
    let mut snapshot = source.export_snapshot();
    let genesis = snapshot.blocks[0].clone();
    snapshot.blocks[0] = Block::from_parts(
        0,
        1,
        vec![],
        genesis.previous_hash().to_string(),
        genesis.hash().to_string(),
        0,
        genesis.merkle_root().to_string(),
    );

    let mut target = Ledger::new(config());
    assert_eq!(
        target.import_snapshot(snapshot),
        Err(ChainIntegrityError::GenesisMismatch)
    );
}

#[test]
fn test_empty_snapshot_rejected() {
    let mut target = Ledger::new(config());
    assert_eq!(
        target.import_snapshot(ChainSnapshot { blocks: vec![] }),
        Err(ChainIntegrityError::EmptyChain)
    );
}

#[test]
fn test_snapshot_bytes_roundtrip_imports() {
    let (source, _) = populated();
    let bytes = source.export_snapshot().to_bytes().unwrap();

    let restored = Ledger::from_snapshot(config(), ChainSnapshot::from_bytes(&bytes).unwrap()).unwrap();
    assert_eq!(restored.export_snapshot(), source.export_snapshot());
}

#[test]
fn test_import_drops_pending_already_sealed() {
    let (source, _) = populated();
    let sealed = source.blocks()[1].transactions()[0].clone();

    let mut target = Ledger::new(config());
    target.submit_pending(sealed).unwrap();
    target.import_snapshot(source.export_snapshot()).unwrap();

    assert!(target.pending().is_empty());
}
