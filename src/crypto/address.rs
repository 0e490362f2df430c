use crate::crypto::PublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Every wallet address starts with this prefix
pub const ADDRESS_PREFIX: &str = "CC";

/// Sender of block rewards; never a valid signer
pub const SYSTEM_SENDER: &str = "system";

const ADDRESS_HEX_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address cannot be empty")]
    Empty,

    #[error("Invalid address prefix: expected 'CC'")]
    InvalidPrefix,

    #[error("Invalid address length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid address digest: {0}")]
    InvalidDigest(String),
}

/// Wallet address: `CC` followed by the first 32 upper-case hex digits of
/// SHA-256(verifier). The reward sentinel `system` is also representable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Derive the address of a verifier
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = hex::encode(Sha256::digest(public_key.as_bytes()));
        Self(format!(
            "{}{}",
            ADDRESS_PREFIX,
            digest[..ADDRESS_HEX_LEN].to_uppercase()
        ))
    }

    /// The reward sentinel sender
    pub fn system() -> Self {
        Self(SYSTEM_SENDER.to_string())
    }

    /// Parse and validate an address string
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        if s == SYSTEM_SENDER {
            return Ok(Self::system());
        }

        let digest = s.strip_prefix(ADDRESS_PREFIX).ok_or(AddressError::InvalidPrefix)?;

        let expected = ADDRESS_PREFIX.len() + ADDRESS_HEX_LEN;
        if s.len() != expected {
            return Err(AddressError::InvalidLength {
                expected,
                got: s.len(),
            });
        }

        if !digest
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        {
            return Err(AddressError::InvalidDigest(digest.to_string()));
        }

        Ok(Self(s.to_string()))
    }

    /// Whether this is the reward sentinel
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_SENDER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}
