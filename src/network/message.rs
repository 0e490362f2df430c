// Protocol - Signed messages exchanged between wallets
//
// Every message is signed over a domain tag plus the postcard encoding of
// its unsigned fields. Payloads are a closed enum; a frame that fails to
// decode into one of the five shapes never reaches dispatch.

use crate::clock::now_millis;
use crate::crypto::{
    new_id, Address, AgreementKey, Envelope, Keypair, PublicKey, Signature, SignatureError,
    Signer,
};
use crate::ledger::ChainSnapshot;
use crate::network::DeviceInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Version string exchanged during the handshake
pub const PROTOCOL_VERSION: &str = "1.0";

/// Largest frame accepted from a transport
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

const MESSAGE_DOMAIN: &[u8] = b"meshwallet:msg:v1";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
}

/// Types of messages in the protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Discovery,
    Handshake,
    Transaction,
    Sync,
    Heartbeat,
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// Announcement of a wallet's presence
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    pub verifier: PublicKey,
    pub device: Option<DeviceInfo>,
}

/// One half of the mutual handshake
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub verifier: PublicKey,
    pub agreement_key: AgreementKey,
    pub version: String,
    pub capabilities: BTreeSet<String>,
    pub device: Option<DeviceInfo>,
    /// Set on the answer to a handshake, which is never answered itself
    pub reply: bool,
}

/// A transaction sealed under the pair's session key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub envelope: Envelope,
}

/// Chain exchange between trusted peers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPayload {
    Request { request_id: String },
    Response { request_id: String, snapshot: ChainSnapshot },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub chain_height: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Discovery(DiscoveryPayload),
    Handshake(HandshakePayload),
    Transaction(TransactionPayload),
    Sync(SyncPayload),
    Heartbeat(HeartbeatPayload),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Discovery(_) => MessageType::Discovery,
            Payload::Handshake(_) => MessageType::Handshake,
            Payload::Transaction(_) => MessageType::Transaction,
            Payload::Sync(_) => MessageType::Sync,
            Payload::Heartbeat(_) => MessageType::Heartbeat,
        }
    }
}

// ============================================================================
// MESSAGE
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2PMessage {
    pub id: String,
    pub from: Address,
    pub to: Option<Address>,
    pub timestamp: i64,
    pub payload: Payload,
    pub signature: Option<Signature>,
    pub encrypted: bool,
}

#[derive(Serialize)]
struct SigningView<'a> {
    id: &'a str,
    from: &'a Address,
    to: Option<&'a Address>,
    timestamp: i64,
    payload: &'a Payload,
    encrypted: bool,
}

impl P2PMessage {
    /// Build and sign a message from `keypair`
    pub fn signed(keypair: &Keypair, to: Option<Address>, payload: Payload) -> Self {
        let encrypted = matches!(payload, Payload::Transaction(_));
        let mut message = Self {
            id: new_id(),
            from: keypair.address(),
            to,
            timestamp: now_millis(),
            payload,
            signature: None,
            encrypted,
        };
        message.signature = Some(Signer::sign(keypair, &message.signing_bytes()));
        message
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    pub fn signing_bytes(&self) -> Vec<u8> {
        let view = SigningView {
            id: &self.id,
            from: &self.from,
            to: self.to.as_ref(),
            timestamp: self.timestamp,
            payload: &self.payload,
            encrypted: self.encrypted,
        };
        let mut bytes = MESSAGE_DOMAIN.to_vec();
        // Serializing plain data into a Vec cannot fail
        bytes.extend(postcard::to_allocvec(&view).unwrap_or_default());
        bytes
    }

    /// Check the signature against a known verifier
    pub fn verify(&self, verifier: &PublicKey) -> Result<(), SignatureError> {
        let signature = self.signature.as_ref().ok_or(SignatureError::Missing)?;
        Signer::verify(verifier, &self.signing_bytes(), signature)
    }

    /// Verifier carried by self-certifying payloads (discovery, handshake)
    pub fn embedded_verifier(&self) -> Option<&PublicKey> {
        match &self.payload {
            Payload::Discovery(d) => Some(&d.verifier),
            Payload::Handshake(h) => Some(&h.verifier),
            Payload::Transaction(_) | Payload::Sync(_) | Payload::Heartbeat(_) => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = postcard::to_allocvec(self)
            .map_err(|e| ProtocolError::SerializationFailed(e.to_string()))?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(bytes.len()));
        }
        postcard::from_bytes(bytes).map_err(|e| ProtocolError::DeserializationFailed(e.to_string()))
    }
}
