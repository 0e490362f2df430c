use crate::crypto::{Address, Keypair, PublicKey, Signature, SignatureError, Signer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SIGNING_DOMAIN: &[u8] = b"meshwallet:tx:v1";

/// A value transfer between two addresses
///
/// Fields are private: once `sign` has attached a signature nothing can
/// change the signed content without invalidating it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    id: String,
    from: Address,
    to: Address,
    amount: u64,
    timestamp: i64,
    nonce: u64,
    note: Option<String>,
    sender_key: Option<PublicKey>,
    signature: Option<Signature>,
}

impl Transaction {
    /// Create an unsigned transaction
    pub fn new(
        id: String,
        from: Address,
        to: Address,
        amount: u64,
        timestamp: i64,
        nonce: u64,
        note: Option<String>,
    ) -> Self {
        Self {
            id,
            from,
            to,
            amount,
            timestamp,
            nonce,
            note,
            sender_key: None,
            signature: None,
        }
    }

    /// Block reward paid by the `system` sentinel
    pub fn reward(id: String, to: Address, amount: u64, timestamp: i64) -> Self {
        Self::new(id, Address::system(), to, amount, timestamp, 0, None)
    }

    /// Reassemble a transaction from stored parts without re-signing
    pub fn from_parts(
        unsigned: Transaction,
        sender_key: Option<PublicKey>,
        signature: Option<Signature>,
    ) -> Self {
        Self {
            sender_key,
            signature,
            ..unsigned
        }
    }

    /// Sign with the sender's keypair, binding its verifier to the transaction
    pub fn sign(mut self, keypair: &Keypair) -> Self {
        let signature = Signer::sign(keypair, &self.signing_bytes());
        self.sender_key = Some(keypair.public_key());
        self.signature = Some(signature);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn from(&self) -> &Address {
        &self.from
    }

    pub fn to(&self) -> &Address {
        &self.to
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn sender_key(&self) -> Option<&PublicKey> {
        self.sender_key.as_ref()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn is_reward(&self) -> bool {
        self.from.is_system()
    }

    /// Check the enclosed signature against the enclosed verifier
    pub fn verify_signature(&self) -> Result<(), SignatureError> {
        let signature = self.signature.as_ref().ok_or(SignatureError::Missing)?;
        let sender_key = self.sender_key.as_ref().ok_or(SignatureError::Missing)?;
        Signer::verify(sender_key, &self.signing_bytes(), signature)
    }

    /// Bytes the sender signs: a domain tag followed by every content field
    /// in fixed order, strings length-prefixed, integers little-endian.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(128);
        bytes.extend_from_slice(SIGNING_DOMAIN);
        put_str(&mut bytes, &self.id);
        put_str(&mut bytes, self.from.as_str());
        put_str(&mut bytes, self.to.as_str());
        bytes.extend_from_slice(&self.amount.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        match &self.note {
            Some(note) => {
                bytes.push(1);
                put_str(&mut bytes, note);
            }
            None => bytes.push(0),
        }
        bytes
    }

    /// Full canonical encoding (signed content plus verifier and signature).
    /// This is what blocks commit to.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = self.signing_bytes();
        match &self.sender_key {
            Some(key) => {
                bytes.push(1);
                bytes.extend_from_slice(key.as_bytes());
            }
            None => bytes.push(0),
        }
        match &self.signature {
            Some(signature) => {
                bytes.push(1);
                bytes.extend_from_slice(signature.as_bytes());
            }
            None => bytes.push(0),
        }
        bytes
    }

    /// SHA-256 of the canonical encoding, hex
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_bytes()))
    }
}

fn put_str(bytes: &mut Vec<u8>, s: &str) {
    bytes.extend_from_slice(&(s.len() as u32).to_le_bytes());
    bytes.extend_from_slice(s.as_bytes());
}
