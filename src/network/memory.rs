// In-process transport
//
// A MemoryHub connects any number of MemoryTransports inside one process.
// Used for local simulation and tests; links are node names.

use crate::network::{PeerChannel, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const TRANSPORT_NAME: &str = "memory";

/// Shared medium for in-process transports
#[derive(Debug, Default)]
pub struct MemoryHub {
    nodes: Mutex<HashMap<String, mpsc::Sender<TransportEvent>>>,
    distances: Mutex<HashMap<(String, String), f32>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Report `meters` as the distance between two nodes, both directions
    pub fn set_distance(&self, a: &str, b: &str, meters: f32) {
        if let Ok(mut distances) = self.distances.lock() {
            distances.insert((a.to_string(), b.to_string()), meters);
            distances.insert((b.to_string(), a.to_string()), meters);
        }
    }

    pub fn is_registered(&self, node: &str) -> bool {
        self.nodes
            .lock()
            .map(|nodes| nodes.contains_key(node))
            .unwrap_or(false)
    }

    fn register(&self, node: &str, inbound: mpsc::Sender<TransportEvent>) -> Result<(), TransportError> {
        let mut nodes = self.lock_nodes()?;
        if nodes.contains_key(node) {
            return Err(TransportError::AlreadyRunning);
        }
        nodes.insert(node.to_string(), inbound);
        Ok(())
    }

    fn unregister(&self, node: &str) -> Result<(), TransportError> {
        let mut nodes = self.lock_nodes()?;
        if nodes.remove(node).is_none() {
            return Err(TransportError::NotRunning);
        }
        for inbound in nodes.values() {
            let _ = inbound.try_send(TransportEvent::Closed {
                transport: TRANSPORT_NAME.to_string(),
                link: node.to_string(),
            });
        }
        Ok(())
    }

    fn deliver(&self, from: &str, to: &str, frame: Vec<u8>) -> Result<(), TransportError> {
        let inbound = self
            .lock_nodes()?
            .get(to)
            .cloned()
            .ok_or_else(|| TransportError::NotConnected(to.to_string()))?;

        let event = TransportEvent::Frame {
            transport: TRANSPORT_NAME.to_string(),
            link: from.to_string(),
            bytes: frame,
            distance: self.distance(from, to),
        };
        inbound.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::SendFailed("channel full".to_string()),
            TrySendError::Closed(_) => TransportError::NotConnected(to.to_string()),
        })
    }

    fn distance(&self, from: &str, to: &str) -> Option<f32> {
        self.distances
            .lock()
            .ok()?
            .get(&(from.to_string(), to.to_string()))
            .copied()
    }

    fn others(&self, node: &str) -> Result<Vec<String>, TransportError> {
        Ok(self
            .lock_nodes()?
            .keys()
            .filter(|name| name.as_str() != node)
            .cloned()
            .collect())
    }

    fn lock_nodes(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, mpsc::Sender<TransportEvent>>>, TransportError>
    {
        self.nodes
            .lock()
            .map_err(|_| TransportError::IoError("hub lock poisoned".to_string()))
    }
}

/// One node's attachment to a MemoryHub
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    node: String,
}

impl MemoryTransport {
    pub fn new(hub: Arc<MemoryHub>, node: &str) -> Self {
        Self {
            hub,
            node: node.to_string(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        TRANSPORT_NAME
    }

    async fn start(&self, inbound: mpsc::Sender<TransportEvent>) -> Result<(), TransportError> {
        self.hub.register(&self.node, inbound)
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.hub.unregister(&self.node)
    }

    async fn broadcast(&self, frame: &[u8]) -> Result<usize, TransportError> {
        let mut delivered = 0;
        for node in self.hub.others(&self.node)? {
            if self.hub.deliver(&self.node, &node, frame.to_vec()).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn open(&self, link: &str) -> Result<Arc<dyn PeerChannel>, TransportError> {
        if !self.hub.is_registered(link) {
            return Err(TransportError::NotConnected(link.to_string()));
        }
        Ok(Arc::new(MemoryChannel {
            hub: self.hub.clone(),
            from: self.node.clone(),
            to: link.to_string(),
            open: AtomicBool::new(true),
        }))
    }
}

struct MemoryChannel {
    hub: Arc<MemoryHub>,
    from: String,
    to: String,
    open: AtomicBool,
}

impl PeerChannel for MemoryChannel {
    fn link(&self) -> &str {
        &self.to
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && self.hub.is_registered(&self.to)
    }

    fn try_send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected(self.to.clone()));
        }
        self.hub.deliver(&self.from, &self.to, frame)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}
