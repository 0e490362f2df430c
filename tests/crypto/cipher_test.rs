// Cipher Tests
// Authenticated encryption of queue entries and relays

use meshwallet::crypto::{Cipher, DecryptionError, Envelope, Keypair, SecretMaterial};

#[test]
fn test_encrypt_decrypt() {
    let key = SecretMaterial::generate().storage_key();
    let envelope = Cipher::encrypt(b"queued transfer", &key).unwrap();

    assert_ne!(envelope.ciphertext(), b"queued transfer");
    assert_eq!(Cipher::decrypt(&envelope, &key).unwrap(), b"queued transfer");
}

#[test]
fn test_fresh_nonce_per_envelope() {
    let key = SecretMaterial::generate().storage_key();
    let a = Cipher::encrypt(b"same", &key).unwrap();
    let b = Cipher::encrypt(b"same", &key).unwrap();

    assert_ne!(a.nonce(), b.nonce());
    assert_ne!(a.ciphertext(), b.ciphertext());
}

#[test]
fn test_wrong_key_rejected() {
    let envelope = Cipher::encrypt(b"secret", &SecretMaterial::generate().storage_key()).unwrap();
    let other = SecretMaterial::generate().storage_key();

    assert_eq!(
        Cipher::decrypt(&envelope, &other),
        Err(DecryptionError::TagMismatch)
    );
}

#[test]
fn test_flipped_byte_rejected() {
    let key = SecretMaterial::generate().storage_key();
    let envelope = Cipher::encrypt(b"secret", &key).unwrap();

    let mut bytes = envelope.to_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    let tampered = Envelope::from_bytes(&bytes).unwrap();

    assert_eq!(
        Cipher::decrypt(&tampered, &key),
        Err(DecryptionError::TagMismatch)
    );
}

#[test]
fn test_truncated_envelope_malformed() {
    assert!(matches!(
        Envelope::from_bytes(&[0u8; 4]),
        Err(DecryptionError::Malformed(_))
    ));
}

#[test]
fn test_peers_share_session_encryption() {
    let alice = Keypair::generate();
    let bob = Keypair::generate();
    let envelope = Cipher::encrypt(
        b"relay",
        &alice.session_key(&bob.agreement_public_key()),
    )
    .unwrap();

    let plaintext =
        Cipher::decrypt(&envelope, &bob.session_key(&alice.agreement_public_key())).unwrap();
    assert_eq!(plaintext, b"relay");
}
