use crate::tx::Transaction;
use sha2::{Digest, Sha256};

/// Root of an empty transaction set
pub const EMPTY_MERKLE_ROOT: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Binary merkle root over transaction hashes, hex encoded.
///
/// A single transaction's root is its own hash. On a level with an odd
/// number of nodes the last node is paired with itself.
pub fn merkle_root(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return EMPTY_MERKLE_ROOT.to_string();
    }

    let mut level: Vec<[u8; 32]> = transactions
        .iter()
        .map(|tx| Sha256::digest(tx.canonical_bytes()).into())
        .collect();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                let mut hasher = Sha256::new();
                hasher.update(left);
                hasher.update(right);
                hasher.finalize().into()
            })
            .collect();
    }

    hex::encode(level[0])
}
