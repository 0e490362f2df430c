// Transport Traits and Core Types
// Any channel that can broadcast frames and open per-peer channels can
// carry the protocol. All transports feed one inbound event stream.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Events a transport reports to the network service
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Raw frame received on `link`
    Frame {
        transport: String,
        link: String,
        bytes: Vec<u8>,
        /// Estimated distance to the sender, if the medium reports one
        distance: Option<f32>,
    },

    /// The channel behind `link` went away
    Closed { transport: String, link: String },
}

// ============================================================================
// TRANSPORT ERRORS
// ============================================================================

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Transport not running")]
    NotRunning,

    #[error("Transport already running")]
    AlreadyRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// A bidirectional channel to one peer
pub trait PeerChannel: Send + Sync {
    fn link(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Queue a frame without waiting; fails if the channel is closed or full
    fn try_send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    fn close(&self);
}

/// A medium carrying frames between wallets
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used to route replies back through the same transport
    fn name(&self) -> &str;

    /// Begin delivering inbound frames to `inbound`
    async fn start(&self, inbound: mpsc::Sender<TransportEvent>) -> Result<(), TransportError>;

    async fn stop(&self) -> Result<(), TransportError>;

    /// Send a frame to everyone reachable; returns how many received it
    async fn broadcast(&self, frame: &[u8]) -> Result<usize, TransportError>;

    /// Open a channel to the peer behind `link`
    async fn open(&self, link: &str) -> Result<Arc<dyn PeerChannel>, TransportError>;
}
