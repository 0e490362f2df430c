// Network module - THE MESH
// Peer discovery, signed messages, handshakes and direct transaction relay

mod config;
mod memory;
mod message;
mod peer;
mod service;
mod tcp;
mod transport;

pub use config::{DeviceInfo, NetworkConfig};
pub use memory::{MemoryHub, MemoryTransport};
pub use message::{
    DiscoveryPayload, HandshakePayload, HeartbeatPayload, MessageType, P2PMessage, Payload,
    ProtocolError, SyncPayload, TransactionPayload, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use peer::{Peer, PeerRegistry, PeerState, PeerStats};
pub use service::{NetworkError, PeerNetwork};
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use transport::{PeerChannel, Transport, TransportError, TransportEvent};
