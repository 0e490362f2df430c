// Queue Retention Tests

use meshwallet::clock::{days_to_millis, now_millis};
use meshwallet::crypto::Keypair;
use meshwallet::queue::{Priority, TransactionQueue, TransactionStatus};
use meshwallet::storage::MemoryStore;
use meshwallet::tx::TransactionBuilder;
use std::sync::Arc;

fn queue_with(statuses: &[TransactionStatus]) -> (TransactionQueue, Vec<String>) {
    let queue = TransactionQueue::new(Arc::new(MemoryStore::new()));
    let alice = Keypair::generate();
    let mut ids = Vec::new();

    for status in statuses {
        let tx = TransactionBuilder::new()
            .sender(&alice)
            .recipient(Keypair::generate().address())
            .amount(1)
            .build()
            .unwrap();
        queue.enqueue(&tx, alice.secret(), Priority::Medium).unwrap();
        match status {
            TransactionStatus::Pending => {}
            TransactionStatus::Syncing => queue.mark_syncing(tx.id()).unwrap(),
            TransactionStatus::Failed => {
                queue.mark_syncing(tx.id()).unwrap();
                queue.mark_failed(tx.id(), "offline").unwrap();
            }
            TransactionStatus::Completed => {
                queue.mark_syncing(tx.id()).unwrap();
                queue.mark_completed(tx.id()).unwrap();
            }
        }
        ids.push(tx.id().to_string());
    }
    (queue, ids)
}

#[test]
fn test_cleanup_keeps_recent_completed() {
    let (queue, _) = queue_with(&[TransactionStatus::Completed]);
    assert_eq!(queue.cleanup(30).unwrap(), 0);
    assert_eq!(queue.list_all().unwrap().len(), 1);
}

#[test]
fn test_cleanup_removes_only_old_completed() {
    let (queue, ids) = queue_with(&[
        TransactionStatus::Pending,
        TransactionStatus::Failed,
        TransactionStatus::Completed,
    ]);

    let later = now_millis() + days_to_millis(31);
    assert_eq!(queue.cleanup_at(30, later).unwrap(), 1);

    let remaining: Vec<String> = queue
        .list_all()
        .unwrap()
        .iter()
        .map(|e| e.id().to_string())
        .collect();
    assert_eq!(remaining, vec![ids[0].clone(), ids[1].clone()]);
}

#[test]
fn test_summary_counts() {
    let (queue, _) = queue_with(&[
        TransactionStatus::Pending,
        TransactionStatus::Pending,
        TransactionStatus::Syncing,
        TransactionStatus::Failed,
        TransactionStatus::Completed,
    ]);

    let summary = queue.summary().unwrap();
    assert_eq!(summary.pending, 2);
    assert_eq!(summary.syncing, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.terminal, 0);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.total, 5);
    assert!(summary.last_completed_at.is_some());
}
