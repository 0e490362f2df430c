use crate::crypto::{Address, SignatureError};
use crate::tx::Transaction;
use thiserror::Error;

/// Errors that can occur when validating a transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing signature: transaction has not been signed")]
    MissingSignature,

    #[error("Invalid signature: signature does not match the transaction content")]
    InvalidSignature,

    #[error("Sender mismatch: the enclosed verifier does not derive the sender address")]
    SenderMismatch,

    #[error("Reserved sender: only block rewards may come from 'system'")]
    ReservedSender,

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Self-payment not allowed: sender and recipient cannot be the same")]
    SelfPayment,

    #[error("Invalid amount: amount cannot be zero")]
    InvalidAmount,

    #[error("Duplicate transaction: {0} is already known")]
    Duplicate(String),

    #[error("Sender {sender} is not this wallet ({wallet})")]
    ForeignSender { sender: String, wallet: String },

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: u64 },
}

impl From<SignatureError> for ValidationError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::Missing => ValidationError::MissingSignature,
            SignatureError::InvalidLength(_) | SignatureError::VerificationFailed => {
                ValidationError::InvalidSignature
            }
        }
    }
}

/// Validator for transactions
pub struct TransactionValidator;

impl TransactionValidator {
    /// Field and signature checks every user transaction must pass
    ///
    /// This performs:
    /// - Reserved sender check (rewards are never signed by users)
    /// - Zero amount and self-payment checks
    /// - Enclosed verifier derives the sender address
    /// - Signature verification
    pub fn validate(tx: &Transaction) -> Result<(), ValidationError> {
        Self::validate_fields(tx)?;

        let sender_key = tx.sender_key().ok_or(ValidationError::MissingSignature)?;
        if &Address::from_public_key(sender_key) != tx.from() {
            return Err(ValidationError::SenderMismatch);
        }

        tx.verify_signature()?;
        Ok(())
    }

    /// Structural checks only; no signature work
    pub fn validate_fields(tx: &Transaction) -> Result<(), ValidationError> {
        if tx.from().is_system() {
            return Err(ValidationError::ReservedSender);
        }
        if tx.to().is_system() {
            return Err(ValidationError::InvalidRecipient(tx.to().to_string()));
        }
        if tx.amount() == 0 {
            return Err(ValidationError::InvalidAmount);
        }
        if tx.from() == tx.to() {
            return Err(ValidationError::SelfPayment);
        }
        Ok(())
    }

    /// Full validation plus the owning wallet's rules: the sender must be
    /// the wallet itself and the amount must be covered by `available`.
    pub fn validate_outgoing(
        tx: &Transaction,
        wallet: &Address,
        available: i64,
    ) -> Result<(), ValidationError> {
        Self::validate(tx)?;

        if tx.from() != wallet {
            return Err(ValidationError::ForeignSender {
                sender: tx.from().to_string(),
                wallet: wallet.to_string(),
            });
        }

        let requested = tx.amount();
        if available < 0 || (available as u64) < requested {
            return Err(ValidationError::InsufficientBalance {
                available,
                requested,
            });
        }
        Ok(())
    }
}
