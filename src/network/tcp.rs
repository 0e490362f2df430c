// TCP Transport Implementation
// Length-prefixed frames over tokio TCP streams. Each connection is a link
// named after the remote socket address; "broadcast" reaches every open
// connection, so discovery over TCP starts by dialing a known endpoint.

use crate::network::{PeerChannel, Transport, TransportError, TransportEvent, MAX_MESSAGE_SIZE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::debug;

const TRANSPORT_NAME: &str = "tcp";

// ============================================================================
// TCP TRANSPORT CONFIG
// ============================================================================

/// Configuration for TCP transport
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Address to bind to
    pub bind_address: String,
    /// Port to bind to (0 for random)
    pub bind_port: u16,
    /// Deadline for outbound connects
    pub connect_timeout: Duration,
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// Maximum number of simultaneous connections
    pub max_connections: usize,
    /// Frames buffered per connection before try_send reports full
    pub channel_capacity: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 0,
            connect_timeout: Duration::from_secs(10),
            nodelay: true,
            max_connections: 64,
            channel_capacity: 100,
        }
    }
}

impl TcpTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, addr: &str) -> Self {
        self.bind_address = addr.to_string();
        self
    }

    pub fn with_bind_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.max_connections == 0 {
            return Err(TransportError::InvalidConfig(
                "max_connections cannot be 0".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(TransportError::InvalidConfig(
                "channel_capacity cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SHARED STATE
// ============================================================================

#[derive(Default)]
struct TcpShared {
    connections: Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>,
    inbound: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, TransportError> {
    mutex
        .lock()
        .map_err(|_| TransportError::IoError("transport lock poisoned".to_string()))
}

// ============================================================================
// TCP TRANSPORT
// ============================================================================

pub struct TcpTransport {
    config: TcpTransportConfig,
    shared: Arc<TcpShared>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config,
            shared: Arc::new(TcpShared::default()),
        }
    }

    /// Bound address once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.shared.local_addr).ok().and_then(|addr| *addr)
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.shared.connections)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Connect to a remote endpoint; returns the link name
    pub async fn dial(&self, address: &str) -> Result<String, TransportError> {
        if lock(&self.shared.inbound)?.is_none() {
            return Err(TransportError::NotRunning);
        }

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let link = stream.peer_addr()?.to_string();
        setup_connection(&self.shared, &self.config, stream, link.clone())?;
        Ok(link)
    }
}

/// Register a stream and spawn its reader and writer tasks
fn setup_connection(
    shared: &Arc<TcpShared>,
    config: &TcpTransportConfig,
    stream: TcpStream,
    link: String,
) -> Result<(), TransportError> {
    let inbound = lock(&shared.inbound)?
        .clone()
        .ok_or(TransportError::NotRunning)?;

    let (write_tx, mut write_rx) = mpsc::channel::<Vec<u8>>(config.channel_capacity);
    {
        let mut connections = lock(&shared.connections)?;
        if connections.len() >= config.max_connections {
            return Err(TransportError::ConnectionFailed(
                "maximum connections reached".to_string(),
            ));
        }
        connections.insert(link.clone(), write_tx);
    }

    stream.set_nodelay(config.nodelay).ok();
    let (mut reader, mut writer) = stream.into_split();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = write_rx.recv().await {
            let len = (frame.len() as u32).to_be_bytes();
            if writer.write_all(&len).await.is_err() || writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let reader_shared = Arc::clone(shared);
    let reader_task = tokio::spawn(async move {
        loop {
            let len = match reader.read_u32().await {
                Ok(len) => len as usize,
                Err(_) => break,
            };
            if len > MAX_MESSAGE_SIZE {
                debug!(link = %link, len, "Oversized frame, closing connection");
                break;
            }
            let mut bytes = vec![0u8; len];
            if reader.read_exact(&mut bytes).await.is_err() {
                break;
            }
            let event = TransportEvent::Frame {
                transport: TRANSPORT_NAME.to_string(),
                link: link.clone(),
                bytes,
                distance: None,
            };
            if inbound.send(event).await.is_err() {
                break;
            }
        }

        if let Ok(mut connections) = reader_shared.connections.lock() {
            connections.remove(&link);
        }
        let _ = inbound
            .send(TransportEvent::Closed {
                transport: TRANSPORT_NAME.to_string(),
                link,
            })
            .await;
    });

    let mut tasks = lock(&shared.tasks)?;
    tasks.push(writer_task);
    tasks.push(reader_task);
    Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &str {
        TRANSPORT_NAME
    }

    async fn start(&self, inbound: mpsc::Sender<TransportEvent>) -> Result<(), TransportError> {
        self.config.validate()?;
        if lock(&self.shared.inbound)?.is_some() {
            return Err(TransportError::AlreadyRunning);
        }

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.bind_port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        *lock(&self.shared.local_addr)? = Some(listener.local_addr()?);
        *lock(&self.shared.inbound)? = Some(inbound);

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, addr)) = listener.accept().await {
                if let Err(e) = setup_connection(&shared, &config, stream, addr.to_string()) {
                    debug!(peer = %addr, error = %e, "Rejected inbound connection");
                }
            }
        });
        lock(&self.shared.tasks)?.push(accept_task);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if lock(&self.shared.inbound)?.take().is_none() {
            return Err(TransportError::NotRunning);
        }
        for task in lock(&self.shared.tasks)?.drain(..) {
            task.abort();
        }
        lock(&self.shared.connections)?.clear();
        *lock(&self.shared.local_addr)? = None;
        Ok(())
    }

    async fn broadcast(&self, frame: &[u8]) -> Result<usize, TransportError> {
        let connections = lock(&self.shared.connections)?;
        Ok(connections
            .values()
            .filter(|writer| writer.try_send(frame.to_vec()).is_ok())
            .count())
    }

    async fn open(&self, link: &str) -> Result<Arc<dyn PeerChannel>, TransportError> {
        let writer = lock(&self.shared.connections)?
            .get(link)
            .cloned()
            .ok_or_else(|| TransportError::NotConnected(link.to_string()))?;
        Ok(Arc::new(TcpChannel {
            link: link.to_string(),
            writer,
            closed: AtomicBool::new(false),
        }))
    }
}

struct TcpChannel {
    link: String,
    writer: mpsc::Sender<Vec<u8>>,
    closed: AtomicBool,
}

impl PeerChannel for TcpChannel {
    fn link(&self) -> &str {
        &self.link
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.writer.is_closed()
    }

    fn try_send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected(self.link.clone()));
        }
        if frame.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::PayloadTooLarge(frame.len()));
        }
        self.writer.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::SendFailed("channel full".to_string()),
            TrySendError::Closed(_) => TransportError::NotConnected(self.link.clone()),
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
