// Wallet record - the identity blob stored under `wallet:record`

use crate::clock::now_millis;
use crate::crypto::{Address, Keypair, PublicKey, SecretMaterial};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletRecord {
    pub address: Address,
    pub verifier: PublicKey,
    pub secret: SecretMaterial,
    /// Available balance as of the last enqueue or sync
    pub balance: i64,
    pub created_at: i64,
}

impl WalletRecord {
    /// Fresh identity with a zero balance
    pub fn generate() -> Self {
        Self::from_secret(SecretMaterial::generate())
    }

    pub fn from_secret(secret: SecretMaterial) -> Self {
        let keypair = Keypair::from_secret(&secret);
        Self {
            address: keypair.address(),
            verifier: keypair.public_key(),
            secret,
            balance: 0,
            created_at: now_millis(),
        }
    }

    /// True when the stored address and verifier derive from the secret
    pub fn is_consistent(&self) -> bool {
        let keypair = Keypair::from_secret(&self.secret);
        keypair.public_key() == self.verifier && keypair.address() == self.address
    }
}
