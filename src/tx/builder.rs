use crate::clock::now_millis;
use crate::crypto::{new_id, Address, Keypair};
use crate::tx::Transaction;
use rand::Rng;
use thiserror::Error;

/// Errors that can occur when building a transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    #[error("Missing sender: sender keypair is required")]
    MissingSender,

    #[error("Missing recipient: recipient address is required")]
    MissingRecipient,

    #[error("Missing amount: transfer amount is required")]
    MissingAmount,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid recipient: {0} cannot receive transfers")]
    InvalidRecipient(String),

    #[error("Self-payment not allowed: sender and recipient cannot be the same")]
    SelfPayment,
}

/// Builder for creating signed transactions
pub struct TransactionBuilder<'a> {
    sender: Option<&'a Keypair>,
    recipient: Option<Address>,
    amount: Option<u64>,
    note: Option<String>,
    nonce: Option<u64>,
    timestamp: Option<i64>,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new() -> Self {
        Self {
            sender: None,
            recipient: None,
            amount: None,
            note: None,
            nonce: None,
            timestamp: None,
        }
    }

    /// Set the sender (required)
    pub fn sender(mut self, keypair: &'a Keypair) -> Self {
        self.sender = Some(keypair);
        self
    }

    /// Set the recipient (required)
    pub fn recipient(mut self, address: Address) -> Self {
        self.recipient = Some(address);
        self
    }

    /// Set the amount (required)
    pub fn amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Attach a free-form note
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Set the nonce (random if not provided)
    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Set the timestamp in unix millis (now if not provided)
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Build and sign the transaction
    pub fn build(self) -> Result<Transaction, BuilderError> {
        let sender = self.sender.ok_or(BuilderError::MissingSender)?;
        let recipient = self.recipient.ok_or(BuilderError::MissingRecipient)?;
        let amount = self.amount.ok_or(BuilderError::MissingAmount)?;

        if amount == 0 {
            return Err(BuilderError::InvalidAmount("amount cannot be zero".to_string()));
        }
        if recipient.is_system() {
            return Err(BuilderError::InvalidRecipient(recipient.to_string()));
        }

        let from = sender.address();
        if from == recipient {
            return Err(BuilderError::SelfPayment);
        }

        let nonce = self.nonce.unwrap_or_else(|| rand::thread_rng().gen::<u64>());
        let timestamp = self.timestamp.unwrap_or_else(now_millis);

        Ok(
            Transaction::new(new_id(), from, recipient, amount, timestamp, nonce, self.note)
                .sign(sender),
        )
    }
}

impl<'a> Default for TransactionBuilder<'a> {
    fn default() -> Self {
        Self::new()
    }
}
