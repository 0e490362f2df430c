// Cipher - Authenticated encryption for queue entries and peer relays
//
// ChaCha20-Poly1305 with a fresh random 96-bit nonce per envelope.
// The 16-byte Poly1305 tag travels at the end of the ciphertext.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("Plaintext too large to encrypt")]
    PlaintextTooLarge,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Authentication tag mismatch")]
    TagMismatch,
}

/// 256-bit symmetric key
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Domain-separated key derivation: SHA-256(domain || material)
    pub fn derive(domain: &[u8], material: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(material);
        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize());
        Self(key)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Nonce plus ciphertext-with-tag
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl Envelope {
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        postcard::to_allocvec(self).unwrap_or_default()
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecryptionError> {
        postcard::from_bytes(bytes).map_err(|e| DecryptionError::Malformed(e.to_string()))
    }
}

/// Authenticated encryption operations
pub struct Cipher;

impl Cipher {
    /// Encrypt under a random nonce
    pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<Envelope, EncryptionError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let aead = ChaCha20Poly1305::new(Key::from_slice(&key.0));
        let ciphertext = aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| EncryptionError::PlaintextTooLarge)?;

        Ok(Envelope { nonce, ciphertext })
    }

    /// Decrypt and authenticate
    pub fn decrypt(envelope: &Envelope, key: &SymmetricKey) -> Result<Vec<u8>, DecryptionError> {
        if envelope.ciphertext.len() < TAG_LEN {
            return Err(DecryptionError::Malformed(format!(
                "ciphertext shorter than the {TAG_LEN}-byte tag"
            )));
        }

        let aead = ChaCha20Poly1305::new(Key::from_slice(&key.0));
        aead.decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
            .map_err(|_| DecryptionError::TagMismatch)
    }
}
