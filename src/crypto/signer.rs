// Signer - Ed25519 signatures over domain-tagged canonical bytes
//
// Transactions and peer messages each sign their own canonical encoding.
// Verification is always strict: non-canonical and small-order encodings
// are refused.

use super::keypair::FixedBytesVisitor;
use crate::crypto::{Keypair, PublicKey};
use ed25519_dalek::{Signature as DalekSignature, Signer as DalekSigner};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub const SIGNATURE_LENGTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid signature length: expected 64, got {0}")]
    InvalidLength(usize),

    #[error("Signature missing")]
    Missing,

    #[error("Signature verification failed")]
    VerificationFailed,
}

/// Detached Ed25519 signature
#[derive(Clone, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| SignatureError::InvalidLength(bytes.len()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", &self.to_hex()[..16])
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = deserializer.deserialize_bytes(FixedBytesVisitor {
            expected: SIGNATURE_LENGTH,
        })?;
        Signature::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

pub struct Signer;

impl Signer {
    pub fn sign(keypair: &Keypair, message: &[u8]) -> Signature {
        Signature(keypair.signing_key().sign(message).to_bytes())
    }

    /// Strict check of `signature` over `message` by `public_key`
    pub fn verify(
        public_key: &PublicKey,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(), SignatureError> {
        public_key
            .inner()
            .verify_strict(message, &DalekSignature::from_bytes(&signature.0))
            .map_err(|_| SignatureError::VerificationFailed)
    }
}
