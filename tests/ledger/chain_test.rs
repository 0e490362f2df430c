// Ledger Chain Tests
// Sealing, balances and structural validation

use meshwallet::crypto::{Address, Keypair};
use meshwallet::ledger::{Block, ChainIntegrityError, Ledger, LedgerConfig, GENESIS_PREVIOUS_HASH};
use meshwallet::tx::{Transaction, TransactionBuilder};

fn new_ledger(difficulty: u32) -> Ledger {
    Ledger::new(
        LedgerConfig::new()
            .with_difficulty(difficulty)
            .with_mining_reward(10),
    )
}

fn transfer(from: &Keypair, to: &Address, amount: u64) -> Transaction {
    TransactionBuilder::new()
        .sender(from)
        .recipient(to.clone())
        .amount(amount)
        .build()
        .unwrap()
}

// ============================================================================
// GENESIS
// ============================================================================

#[test]
fn test_genesis_is_deterministic() {
    let a = Block::genesis();
    let b = Block::genesis();

    assert_eq!(a, b);
    assert_eq!(a.index(), 0);
    assert_eq!(a.previous_hash(), GENESIS_PREVIOUS_HASH);
    assert!(a.transactions().is_empty());
    assert!(a.verify_hash());
}

#[test]
fn test_fresh_address_has_zero_balance() {
    let ledger = new_ledger(1);
    assert_eq!(ledger.balance_of(&Keypair::generate().address()), 0);
}

// ============================================================================
// SEALING
// ============================================================================

#[test]
fn test_sealed_chain_is_valid() {
    let mut ledger = new_ledger(2);
    let alice = Keypair::generate();
    let bob = Keypair::generate();

    for amount in [5, 7, 9] {
        ledger
            .submit_pending(transfer(&alice, &bob.address(), amount))
            .unwrap();
        ledger.seal_block(&alice.address()).unwrap();
        assert!(ledger.is_valid());
    }

    assert_eq!(ledger.len(), 4);
    assert_eq!(ledger.height(), 3);
}

#[test]
fn test_block_hash_recomputes() {
    let mut ledger = new_ledger(1);
    let alice = Keypair::generate();
    ledger
        .submit_pending(transfer(&alice, &Keypair::generate().address(), 3))
        .unwrap();
    let block = ledger.seal_block(&alice.address()).unwrap();

    assert_eq!(block.compute_hash(), block.hash());
    assert_eq!(block.previous_hash(), Block::genesis().hash());
}

#[test]
fn test_reward_appended_last() {
    let mut ledger = new_ledger(0);
    let alice = Keypair::generate();
    let miner = Keypair::generate().address();
    ledger
        .submit_pending(transfer(&alice, &Keypair::generate().address(), 3))
        .unwrap();

    let block = ledger.seal_block(&miner).unwrap();
    let reward = block.transactions().last().unwrap();

    assert!(reward.is_reward());
    assert_eq!(reward.from(), &Address::system());
    assert_eq!(reward.to(), &miner);
    assert_eq!(reward.amount(), 10);
}

#[test]
fn test_empty_pool_seals_reward_only_block() {
    let mut ledger = new_ledger(0);
    let miner = Keypair::generate().address();

    let block = ledger.seal_block(&miner).unwrap();
    assert_eq!(block.transactions().len(), 1);
    assert_eq!(ledger.balance_of(&miner), 10);
}

#[test]
fn test_balances_are_net_deltas() {
    let mut ledger = new_ledger(0);
    let alice = Keypair::generate();
    let bob = Keypair::generate();

    ledger.seal_block(&alice.address()).unwrap();
    ledger
        .submit_pending(transfer(&alice, &bob.address(), 4))
        .unwrap();
    ledger
        .submit_pending(transfer(&bob, &alice.address(), 1))
        .unwrap();
    ledger.seal_block(&bob.address()).unwrap();

    assert_eq!(ledger.balance_of(&alice.address()), 10 - 4 + 1);
    assert_eq!(ledger.balance_of(&bob.address()), 4 - 1 + 10);
}

#[test]
fn test_unsigned_structure_checks_at_submit() {
    let mut ledger = new_ledger(0);
    let alice = Keypair::generate();
    let reward = Transaction::reward("r".to_string(), alice.address(), 5, 0);
    assert!(ledger.submit_pending(reward).is_err());
}

// ============================================================================
// STRUCTURAL VALIDATION
// ============================================================================

#[test]
fn test_validate_reports_first_broken_link() {
    let mut ledger = new_ledger(0);
    let miner = Keypair::generate().address();
    ledger.seal_block(&miner).unwrap();
    ledger.seal_block(&miner).unwrap();

    let mut snapshot = ledger.export_snapshot();
    let original = snapshot.blocks[2].clone();
    snapshot.blocks[2] = Block::from_parts(
        original.index(),
        original.timestamp(),
        original.transactions().to_vec(),
        "f".repeat(64),
        original.hash().to_string(),
        original.nonce(),
        original.merkle_root().to_string(),
    );

    let mut other = new_ledger(0);
    assert_eq!(
        other.import_snapshot(snapshot),
        Err(ChainIntegrityError::LinkMismatch(2))
    );
}
