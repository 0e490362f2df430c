use crate::crypto::Address;
use crate::ledger::{Block, CancelFlag, Ledger, LedgerError, MineOutcome};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Ledger shared between the wallet runtime, sync engine and network
pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Seal the pending pool without holding the ledger lock during the search.
///
/// The nonce search runs on a blocking worker so it never stalls network
/// tasks. Returns `Ok(None)` when `cancel` aborted the search; the
/// transactions are back in the pending pool in that case.
pub async fn seal_pending(
    ledger: &SharedLedger,
    reward_address: &Address,
    cancel: &CancelFlag,
) -> Result<Option<Block>, LedgerError> {
    let template = ledger.write().await.prepare_block(reward_address);
    debug!(
        index = template.index(),
        transactions = template.transactions().len(),
        difficulty = template.difficulty(),
        "Mining block"
    );

    let flag = cancel.clone();
    let outcome = tokio::task::spawn_blocking(move || template.mine(&flag))
        .await
        .map_err(|e| LedgerError::Worker(e.to_string()))?;

    let mut ledger = ledger.write().await;
    match outcome {
        MineOutcome::Mined(block) => match ledger.commit_block(block.clone()) {
            Ok(()) => Ok(Some(block)),
            Err(e) => {
                warn!(error = %e, "Mined block no longer fits the chain");
                ledger.restore_pending(block.into_transactions());
                Err(e.into())
            }
        },
        MineOutcome::Cancelled(template) => {
            debug!(index = template.index(), "Mining cancelled");
            ledger.restore_pending(template.into_user_transactions());
            Ok(None)
        }
    }
}
