// Transaction Validator Tests
// Any field altered after signing must fail validation

use meshwallet::crypto::{Address, Keypair};
use meshwallet::tx::{Transaction, TransactionBuilder, TransactionValidator, ValidationError};

fn signed(from: &Keypair, to: &Address, amount: u64) -> Transaction {
    TransactionBuilder::new()
        .sender(from)
        .recipient(to.clone())
        .amount(amount)
        .note("rent")
        .build()
        .unwrap()
}

/// Rebuild `tx` with one field changed, keeping the original signature
fn tampered(tx: &Transaction, to: Address, amount: u64, note: Option<String>) -> Transaction {
    Transaction::from_parts(
        Transaction::new(
            tx.id().to_string(),
            tx.from().clone(),
            to,
            amount,
            tx.timestamp(),
            tx.nonce(),
            note,
        ),
        tx.sender_key().cloned(),
        tx.signature().cloned(),
    )
}

// ============================================================================
// SIGNATURES
// ============================================================================

#[test]
fn test_valid_transaction() {
    let alice = Keypair::generate();
    let tx = signed(&alice, &Keypair::generate().address(), 10);
    assert!(TransactionValidator::validate(&tx).is_ok());
}

#[test]
fn test_altered_amount_rejected() {
    let alice = Keypair::generate();
    let bob = Keypair::generate().address();
    let tx = signed(&alice, &bob, 10);

    let forged = tampered(&tx, bob, 10_000, Some("rent".to_string()));
    assert_eq!(
        TransactionValidator::validate(&forged),
        Err(ValidationError::InvalidSignature)
    );
}

#[test]
fn test_altered_recipient_rejected() {
    let alice = Keypair::generate();
    let tx = signed(&alice, &Keypair::generate().address(), 10);

    let forged = tampered(&tx, Keypair::generate().address(), 10, Some("rent".to_string()));
    assert_eq!(
        TransactionValidator::validate(&forged),
        Err(ValidationError::InvalidSignature)
    );
}

#[test]
fn test_altered_note_rejected() {
    let alice = Keypair::generate();
    let bob = Keypair::generate().address();
    let tx = signed(&alice, &bob, 10);

    let forged = tampered(&tx, bob, 10, None);
    assert_eq!(
        TransactionValidator::validate(&forged),
        Err(ValidationError::InvalidSignature)
    );
}

#[test]
fn test_unsigned_rejected() {
    let tx = Transaction::new(
        "id".to_string(),
        Keypair::generate().address(),
        Keypair::generate().address(),
        5,
        0,
        0,
        None,
    );
    assert_eq!(
        TransactionValidator::validate(&tx),
        Err(ValidationError::MissingSignature)
    );
}

#[test]
fn test_verifier_must_derive_sender() {
    let alice = Keypair::generate();
    let mallory = Keypair::generate();
    let bob = Keypair::generate().address();

    // Claims to be from alice, signed by mallory
    let tx = Transaction::new(
        "id".to_string(),
        alice.address(),
        bob,
        5,
        0,
        0,
        None,
    )
    .sign(&mallory);
    assert_eq!(
        TransactionValidator::validate(&tx),
        Err(ValidationError::SenderMismatch)
    );
}

// ============================================================================
// FIELDS
// ============================================================================

#[test]
fn test_reward_sender_reserved() {
    let tx = Transaction::reward("r".to_string(), Keypair::generate().address(), 10, 0);
    assert_eq!(
        TransactionValidator::validate(&tx),
        Err(ValidationError::ReservedSender)
    );
}

#[test]
fn test_zero_amount_rejected() {
    let alice = Keypair::generate();
    let tx = Transaction::new(
        "id".to_string(),
        alice.address(),
        Keypair::generate().address(),
        0,
        0,
        0,
        None,
    )
    .sign(&alice);
    assert_eq!(
        TransactionValidator::validate(&tx),
        Err(ValidationError::InvalidAmount)
    );
}

// ============================================================================
// OUTGOING
// ============================================================================

#[test]
fn test_outgoing_requires_own_sender() {
    let alice = Keypair::generate();
    let tx = signed(&alice, &Keypair::generate().address(), 10);
    let wallet = Keypair::generate().address();

    assert!(matches!(
        TransactionValidator::validate_outgoing(&tx, &wallet, 1_000),
        Err(ValidationError::ForeignSender { .. })
    ));
}

#[test]
fn test_outgoing_requires_funds() {
    let alice = Keypair::generate();
    let tx = signed(&alice, &Keypair::generate().address(), 10);

    assert_eq!(
        TransactionValidator::validate_outgoing(&tx, &alice.address(), 9),
        Err(ValidationError::InsufficientBalance {
            available: 9,
            requested: 10
        })
    );
    assert!(TransactionValidator::validate_outgoing(&tx, &alice.address(), 10).is_ok());
    assert!(matches!(
        TransactionValidator::validate_outgoing(&tx, &alice.address(), -5),
        Err(ValidationError::InsufficientBalance { .. })
    ));
}
