// Keypair Tests
// Identity derivation from a single secret seed

use meshwallet::crypto::{Address, AddressError, Keypair, SecretMaterial, ADDRESS_PREFIX};

// ============================================================================
// DERIVATION
// ============================================================================

#[test]
fn test_same_secret_same_identity() {
    let secret = SecretMaterial::generate();
    let a = Keypair::from_secret(&secret);
    let b = Keypair::from_secret(&secret);

    assert_eq!(a.public_key(), b.public_key());
    assert_eq!(a.agreement_public_key(), b.agreement_public_key());
    assert_eq!(a.address(), b.address());
}

#[test]
fn test_different_secrets_different_addresses() {
    assert_ne!(Keypair::generate().address(), Keypair::generate().address());
}

#[test]
fn test_secret_rejects_wrong_length() {
    assert!(SecretMaterial::from_bytes(&[7u8; 31]).is_err());
    assert!(SecretMaterial::from_bytes(&[7u8; 32]).is_ok());
}

// ============================================================================
// ADDRESSES
// ============================================================================

#[test]
fn test_address_format() {
    let address = Keypair::generate().address();
    let s = address.as_str();

    assert!(s.starts_with(ADDRESS_PREFIX));
    assert_eq!(s.len(), 34);
    assert!(s[2..]
        .chars()
        .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
}

#[test]
fn test_address_parse_roundtrip() {
    let address = Keypair::generate().address();
    assert_eq!(Address::parse(address.as_str()).unwrap(), address);
}

#[test]
fn test_address_parse_rejects_malformed() {
    assert_eq!(Address::parse(""), Err(AddressError::Empty));
    assert_eq!(
        Address::parse("XX0123456789ABCDEF0123456789ABCDEF"),
        Err(AddressError::InvalidPrefix)
    );
    assert!(matches!(
        Address::parse("CC0123"),
        Err(AddressError::InvalidLength { .. })
    ));
    assert!(matches!(
        Address::parse("CC0123456789abcdef0123456789abcdef"),
        Err(AddressError::InvalidDigest(_))
    ));
}

#[test]
fn test_system_sentinel() {
    let system = Address::parse("system").unwrap();
    assert!(system.is_system());
    assert!(!Keypair::generate().address().is_system());
}

// ============================================================================
// KEY AGREEMENT
// ============================================================================

#[test]
fn test_session_key_is_symmetric() {
    let alice = Keypair::generate();
    let bob = Keypair::generate();

    let ab = alice.session_key(&bob.agreement_public_key());
    let ba = bob.session_key(&alice.agreement_public_key());
    assert_eq!(ab, ba);
}

#[test]
fn test_session_key_differs_per_peer() {
    let alice = Keypair::generate();
    let bob = Keypair::generate();
    let carol = Keypair::generate();

    assert_ne!(
        alice.session_key(&bob.agreement_public_key()),
        alice.session_key(&carol.agreement_public_key())
    );
}

#[test]
fn test_storage_key_not_session_key() {
    let alice = Keypair::generate();
    let bob = Keypair::generate();
    assert_ne!(
        alice.storage_key(),
        alice.session_key(&bob.agreement_public_key())
    );
}
