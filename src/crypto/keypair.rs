// Keypair - Wallet identity derived from one secret seed
//
// The 32-byte seed is the only secret the session collaborator hands us.
// Everything else is derived from it:
// - Ed25519 signing key (the verifier is its public key)
// - secp256k1 key-agreement key (per-peer session keys via ECDH)
// - the symmetric key protecting the local queue

use crate::crypto::{Address, SymmetricKey};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::ecdh::SharedSecret;
use secp256k1::Secp256k1;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

const AGREEMENT_DOMAIN: &[u8] = b"meshwallet:agreement:v1:";
const STORAGE_DOMAIN: &[u8] = b"meshwallet:storage:v1:";
const SESSION_DOMAIN: &[u8] = b"meshwallet:session:v1:";

#[derive(Error, Debug)]
pub enum KeypairError {
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid key bytes: {0}")]
    InvalidBytes(String),
}

// ============================================================================
// SECRET MATERIAL
// ============================================================================

/// The 32-byte seed backing a wallet identity
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMaterial([u8; 32]);

impl SecretMaterial {
    /// Draw a fresh seed from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeypairError> {
        let seed: [u8; 32] = bytes.try_into().map_err(|_| KeypairError::InvalidLength {
            expected: 32,
            got: bytes.len(),
        })?;
        Ok(Self(seed))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Key used to encrypt entries in the local transaction queue
    pub fn storage_key(&self) -> SymmetricKey {
        SymmetricKey::derive(STORAGE_DOMAIN, &self.0)
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretMaterial(..)")
    }
}

// ============================================================================
// PUBLIC KEY (VERIFIER)
// ============================================================================

/// Ed25519 public key (32 bytes), used as the signature verifier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(self.0.as_bytes())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = deserializer.deserialize_bytes(FixedBytesVisitor { expected: 32 })?;
        PublicKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl PublicKey {
    /// Get the raw bytes of the public key
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Create a public key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeypairError> {
        let bytes_array: [u8; 32] = bytes.try_into().map_err(|_| KeypairError::InvalidLength {
            expected: 32,
            got: bytes.len(),
        })?;

        let verifying_key = VerifyingKey::from_bytes(&bytes_array)
            .map_err(|e| KeypairError::InvalidBytes(e.to_string()))?;

        Ok(Self(verifying_key))
    }

    /// Hex form, used for display and logs
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    pub(crate) fn inner(&self) -> &VerifyingKey {
        &self.0
    }
}

// ============================================================================
// AGREEMENT KEY
// ============================================================================

/// Public half of the secp256k1 key-agreement key (33 bytes, compressed)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgreementKey(secp256k1::PublicKey);

impl AgreementKey {
    /// Compressed SEC1 encoding
    pub fn to_bytes(&self) -> [u8; 33] {
        self.0.serialize()
    }

    /// Parse a compressed or uncompressed SEC1 point
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeypairError> {
        secp256k1::PublicKey::from_slice(bytes)
            .map(Self)
            .map_err(|e| KeypairError::InvalidBytes(e.to_string()))
    }
}

impl Serialize for AgreementKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.0.serialize())
    }
}

impl<'de> Deserialize<'de> for AgreementKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = deserializer.deserialize_bytes(FixedBytesVisitor { expected: 33 })?;
        AgreementKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Accepts either a byte string or a sequence of bytes of a fixed length.
/// Shared by keys and signatures.
pub(crate) struct FixedBytesVisitor {
    pub(crate) expected: usize,
}

impl<'de> serde::de::Visitor<'de> for FixedBytesVisitor {
    type Value = Vec<u8>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{} bytes", self.expected)
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        if v.len() != self.expected {
            return Err(E::invalid_length(v.len(), &self));
        }
        Ok(v.to_vec())
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut bytes = Vec::with_capacity(self.expected);
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        if bytes.len() != self.expected {
            return Err(serde::de::Error::invalid_length(bytes.len(), &self));
        }
        Ok(bytes)
    }
}

// ============================================================================
// KEYPAIR
// ============================================================================

/// Full wallet identity: signing key plus key-agreement key
#[derive(Clone)]
pub struct Keypair {
    seed: SecretMaterial,
    signing_key: SigningKey,
    agreement_key: secp256k1::SecretKey,
}

impl Keypair {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self::from_secret(&SecretMaterial::generate())
    }

    /// Rebuild an identity from its seed
    pub fn from_secret(secret: &SecretMaterial) -> Self {
        let signing_key = SigningKey::from_bytes(secret.as_bytes());
        let agreement_key = derive_agreement_key(secret.as_bytes());
        Self {
            seed: secret.clone(),
            signing_key,
            agreement_key,
        }
    }

    /// The seed (what the session collaborator stores)
    pub fn secret(&self) -> &SecretMaterial {
        &self.seed
    }

    /// The verifier other parties check signatures against
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key())
    }

    /// Public key-agreement key, advertised during the handshake
    pub fn agreement_public_key(&self) -> AgreementKey {
        let secp = Secp256k1::signing_only();
        AgreementKey(secp256k1::PublicKey::from_secret_key(&secp, &self.agreement_key))
    }

    /// Wallet address derived from the verifier
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key())
    }

    /// Key used to encrypt entries in the local transaction queue
    pub fn storage_key(&self) -> SymmetricKey {
        self.seed.storage_key()
    }

    /// Per-peer session key: both sides arrive at the same value
    pub fn session_key(&self, peer: &AgreementKey) -> SymmetricKey {
        let shared = SharedSecret::new(&peer.0, &self.agreement_key);
        SymmetricKey::derive(SESSION_DOMAIN, &shared.secret_bytes())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

/// Hash the seed until it lands inside the secp256k1 scalar range
fn derive_agreement_key(seed: &[u8; 32]) -> secp256k1::SecretKey {
    let mut hasher = Sha256::new();
    hasher.update(AGREEMENT_DOMAIN);
    hasher.update(seed);
    let mut digest = hasher.finalize();

    loop {
        if let Ok(key) = secp256k1::SecretKey::from_slice(&digest) {
            return key;
        }
        digest = Sha256::digest(digest);
    }
}
