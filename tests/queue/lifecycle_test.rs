// Queue Lifecycle Tests
// Enqueue, drain order, status transitions, retries and holds

use meshwallet::crypto::Keypair;
use meshwallet::queue::{
    Origin, Priority, QueueError, TransactionQueue, TransactionStatus,
};
use meshwallet::storage::{KvStore, MemoryStore};
use meshwallet::tx::{Transaction, TransactionBuilder};
use std::sync::Arc;

fn setup() -> (TransactionQueue, Keypair) {
    (
        TransactionQueue::new(Arc::new(MemoryStore::new())),
        Keypair::generate(),
    )
}

fn transfer(from: &Keypair, amount: u64) -> Transaction {
    TransactionBuilder::new()
        .sender(from)
        .recipient(Keypair::generate().address())
        .amount(amount)
        .build()
        .unwrap()
}

// ============================================================================
// ENQUEUE AND LISTING
// ============================================================================

#[test]
fn test_enqueued_entry_is_pending() {
    let (queue, alice) = setup();
    let tx = transfer(&alice, 40);

    let id = queue.enqueue(&tx, alice.secret(), Priority::Medium).unwrap();
    assert_eq!(id, tx.id());

    let pending = queue.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    let entry = &pending[0];
    assert_eq!(entry.status(), TransactionStatus::Pending);
    assert_eq!(entry.retry_count(), 0);
    assert_eq!(entry.hold(), 40);
    assert_eq!(entry.origin(), &Origin::Local);
    assert!(entry.last_attempt().is_none());
}

#[test]
fn test_drain_order_priority_then_age() {
    let (queue, alice) = setup();
    let low = transfer(&alice, 1);
    let medium = transfer(&alice, 2);
    let high = transfer(&alice, 3);

    queue.enqueue(&low, alice.secret(), Priority::Low).unwrap();
    queue.enqueue(&medium, alice.secret(), Priority::Medium).unwrap();
    queue.enqueue(&high, alice.secret(), Priority::High).unwrap();

    let order: Vec<String> = queue
        .list_pending()
        .unwrap()
        .iter()
        .map(|e| e.id().to_string())
        .collect();
    assert_eq!(order, vec![high.id(), medium.id(), low.id()]);
}

#[test]
fn test_completed_leaves_pending_but_stays_in_all() {
    let (queue, alice) = setup();
    let tx = transfer(&alice, 5);
    queue.enqueue(&tx, alice.secret(), Priority::Medium).unwrap();

    queue.mark_syncing(tx.id()).unwrap();
    assert!(queue.list_pending().unwrap().is_empty());
    queue.mark_completed(tx.id()).unwrap();

    let all = queue.list_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status(), TransactionStatus::Completed);
    assert!(all[0].completed_at().is_some());
    assert!(all[0].last_attempt().is_some());
}

#[test]
fn test_received_entry_holds_nothing() {
    let (queue, bob) = setup();
    let alice = Keypair::generate();
    let tx = TransactionBuilder::new()
        .sender(&alice)
        .recipient(bob.address())
        .amount(70)
        .build()
        .unwrap();

    queue
        .enqueue_received(&tx, bob.secret(), Origin::Peer(alice.address()))
        .unwrap();

    let entry = queue.get(tx.id()).unwrap().unwrap();
    assert_eq!(entry.hold(), 0);
    assert_eq!(entry.origin(), &Origin::Peer(alice.address()));
    assert_eq!(queue.outstanding_holds().unwrap(), 0);
    assert_eq!(
        TransactionQueue::decrypt_entry(&entry, bob.secret()).unwrap(),
        tx
    );
}

// ============================================================================
// TRANSITIONS
// ============================================================================

#[test]
fn test_completed_cannot_go_back() {
    let (queue, alice) = setup();
    let tx = transfer(&alice, 5);
    queue.enqueue(&tx, alice.secret(), Priority::Medium).unwrap();
    queue.mark_completed(tx.id()).unwrap();

    assert!(matches!(
        queue.mark_syncing(tx.id()),
        Err(QueueError::InvalidTransition {
            from: TransactionStatus::Completed,
            to: TransactionStatus::Syncing,
            ..
        })
    ));
    assert!(queue.mark_failed(tx.id(), "late").is_err());
}

#[test]
fn test_unknown_id_not_found() {
    let (queue, _) = setup();
    assert!(matches!(
        queue.mark_syncing("missing"),
        Err(QueueError::NotFound(_))
    ));
    assert!(queue.get("missing").unwrap().is_none());
}

#[test]
fn test_failed_records_reason_and_retries() {
    let (queue, alice) = setup();
    let tx = transfer(&alice, 5);
    queue.enqueue(&tx, alice.secret(), Priority::Medium).unwrap();

    queue.mark_syncing(tx.id()).unwrap();
    assert!(!queue.mark_failed(tx.id(), "offline").unwrap());

    let failed = queue.list_failed().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count(), 1);
    assert_eq!(failed[0].last_error(), Some("offline"));
    assert!(!failed[0].is_terminal());

    // A retry goes straight back to syncing
    queue.mark_syncing(tx.id()).unwrap();
    queue.mark_completed(tx.id()).unwrap();
    assert!(queue.get(tx.id()).unwrap().unwrap().last_error().is_none());
}

#[test]
fn test_terminal_after_default_retries_then_requeue() {
    let (queue, alice) = setup();
    let tx = transfer(&alice, 9);
    queue.enqueue(&tx, alice.secret(), Priority::Medium).unwrap();

    queue.mark_syncing(tx.id()).unwrap();
    assert!(!queue.mark_failed(tx.id(), "1").unwrap());
    queue.mark_syncing(tx.id()).unwrap();
    assert!(!queue.mark_failed(tx.id(), "2").unwrap());
    queue.mark_syncing(tx.id()).unwrap();
    assert!(queue.mark_failed(tx.id(), "3").unwrap());

    let summary = queue.summary().unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.terminal, 1);

    queue.requeue(tx.id()).unwrap();
    let entry = queue.get(tx.id()).unwrap().unwrap();
    assert_eq!(entry.status(), TransactionStatus::Failed);
    assert_eq!(entry.retry_count(), 0);
    assert!(!entry.is_terminal());
}

#[test]
fn test_requeue_requires_failed() {
    let (queue, alice) = setup();
    let tx = transfer(&alice, 9);
    queue.enqueue(&tx, alice.secret(), Priority::Medium).unwrap();
    assert!(matches!(
        queue.requeue(tx.id()),
        Err(QueueError::InvalidTransition { .. })
    ));
}

#[test]
fn test_interrupted_attempts_roll_back() {
    let (queue, alice) = setup();
    let first_try = transfer(&alice, 10);
    let retried = transfer(&alice, 20);
    let done = transfer(&alice, 30);
    for tx in [&first_try, &retried, &done] {
        queue.enqueue(tx, alice.secret(), Priority::Medium).unwrap();
        queue.mark_syncing(tx.id()).unwrap();
    }
    queue.mark_failed(retried.id(), "offline").unwrap();
    queue.mark_syncing(retried.id()).unwrap();
    queue.mark_completed(done.id()).unwrap();

    let mut recovered = queue.recover_interrupted().unwrap();
    recovered.sort();
    let mut expected = vec![first_try.id().to_string(), retried.id().to_string()];
    expected.sort();
    assert_eq!(recovered, expected);

    let entry = queue.get(first_try.id()).unwrap().unwrap();
    assert_eq!(entry.status(), TransactionStatus::Pending);
    let entry = queue.get(retried.id()).unwrap().unwrap();
    assert_eq!(entry.status(), TransactionStatus::Failed);
    assert_eq!(entry.retry_count(), 1);
    assert_eq!(
        queue.get(done.id()).unwrap().unwrap().status(),
        TransactionStatus::Completed
    );

    // Holds were never released, and requeue works on the failed one again
    assert_eq!(queue.outstanding_holds().unwrap(), 30);
    queue.requeue(retried.id()).unwrap();
    assert!(queue.recover_interrupted().unwrap().is_empty());
}

// ============================================================================
// HOLDS
// ============================================================================

#[test]
fn test_holds_until_settled() {
    let (queue, alice) = setup();
    let a = transfer(&alice, 30);
    let b = transfer(&alice, 12);
    queue.enqueue(&a, alice.secret(), Priority::Medium).unwrap();
    queue.enqueue(&b, alice.secret(), Priority::Medium).unwrap();
    assert_eq!(queue.outstanding_holds().unwrap(), 42);

    // A retryable failure keeps holding
    queue.mark_syncing(a.id()).unwrap();
    queue.mark_failed(a.id(), "offline").unwrap();
    assert_eq!(queue.outstanding_holds().unwrap(), 42);

    queue.mark_syncing(b.id()).unwrap();
    queue.mark_completed(b.id()).unwrap();
    assert_eq!(queue.outstanding_holds().unwrap(), 30);
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn test_table_shared_through_store() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let alice = Keypair::generate();
    let tx = transfer(&alice, 3);

    TransactionQueue::new(Arc::clone(&store))
        .enqueue(&tx, alice.secret(), Priority::High)
        .unwrap();

    let reopened = TransactionQueue::new(store);
    let entry = reopened.get(tx.id()).unwrap().unwrap();
    assert_eq!(entry.priority(), Priority::High);
}

#[test]
fn test_concurrent_enqueue_loses_nothing() {
    let queue = TransactionQueue::new(Arc::new(MemoryStore::new()));
    let alice = Keypair::generate();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let queue = queue.clone();
            let alice = alice.clone();
            scope.spawn(move || {
                for _ in 0..5 {
                    let tx = transfer(&alice, 1);
                    queue.enqueue(&tx, alice.secret(), Priority::Medium).unwrap();
                }
            });
        }
    });

    assert_eq!(queue.list_all().unwrap().len(), 40);
}
