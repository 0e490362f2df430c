// PeerNetwork - Discovery, handshakes and transaction relay
//
// One instance per wallet, owning its transports and peer registry. The
// registry, open channels and outstanding requests sit behind a single
// mutex, so message handling, heartbeats and sweeps never race. Inbound
// frames that fail to decode or verify are dropped at this boundary.

use crate::clock::now_millis;
use crate::crypto::{new_id, Address, Cipher, EncryptionError, Keypair};
use crate::ledger::{ChainSnapshot, SharedLedger};
use crate::network::{
    DiscoveryPayload, HandshakePayload, HeartbeatPayload, MessageType, NetworkConfig, P2PMessage,
    Payload, Peer, PeerChannel, PeerRegistry, PeerState, ProtocolError, SyncPayload,
    TransactionPayload, Transport, TransportError, TransportEvent,
};
use crate::queue::{Origin, QueueError, TransactionQueue};
use crate::tx::{CodecError, Transaction, TransactionCodec, TransactionValidator};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const INBOUND_CAPACITY: usize = 1024;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Peer unavailable: no open channel to {0}")]
    PeerUnavailable(String),

    #[error("Peer {0} is not trusted")]
    NotTrusted(String),

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Network already running")]
    AlreadyRunning,

    #[error("Network not running")]
    NotRunning,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ============================================================================
// STATE
// ============================================================================

struct PendingRequest {
    peer: Address,
    reply: oneshot::Sender<ChainSnapshot>,
}

struct NetworkState {
    registry: PeerRegistry,
    channels: HashMap<Address, Arc<dyn PeerChannel>>,
    requests: HashMap<String, PendingRequest>,
}

impl NetworkState {
    fn evict_channel(&mut self, id: &Address) {
        if let Some(channel) = self.channels.remove(id) {
            channel.close();
        }
    }

    fn evict(&mut self, id: &Address) {
        self.evict_channel(id);
        self.requests.retain(|_, request| &request.peer != id);
    }

    fn open_channel(&self, id: &Address) -> Option<Arc<dyn PeerChannel>> {
        self.channels.get(id).filter(|c| c.is_open()).cloned()
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

// ============================================================================
// PEER NETWORK
// ============================================================================

pub struct PeerNetwork {
    keypair: Keypair,
    config: NetworkConfig,
    ledger: SharedLedger,
    queue: TransactionQueue,
    transports: Vec<Arc<dyn Transport>>,
    state: Mutex<NetworkState>,
    running: Mutex<Option<Running>>,
}

impl PeerNetwork {
    pub fn new(
        keypair: Keypair,
        ledger: SharedLedger,
        queue: TransactionQueue,
        config: NetworkConfig,
    ) -> Self {
        let registry = PeerRegistry::new(keypair.address());
        Self {
            keypair,
            config,
            ledger,
            queue,
            transports: Vec::new(),
            state: Mutex::new(NetworkState {
                registry,
                channels: HashMap::new(),
                requests: HashMap::new(),
            }),
            running: Mutex::new(None),
        }
    }

    /// Attach a transport; every attached transport feeds the same handler
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    fn transport(&self, name: &str) -> Option<&Arc<dyn Transport>> {
        self.transports.iter().find(|t| t.name() == name)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Start every transport plus the inbound, heartbeat, sweep and
    /// announce tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), NetworkError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(NetworkError::AlreadyRunning);
        }
        self.config.validate().map_err(NetworkError::InvalidConfig)?;

        let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        for transport in &self.transports {
            transport.start(inbound_tx.clone()).await?;
        }
        drop(inbound_tx);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(4);

        let net = Arc::clone(self);
        let mut inbound_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inbound_shutdown.changed() => break,
                    event = inbound_rx.recv() => match event {
                        Some(event) => net.handle_event(event).await,
                        None => break,
                    },
                }
            }
        }));

        tasks.push(self.spawn_ticker(
            self.config.heartbeat_interval,
            shutdown_rx.clone(),
            |net| async move { net.send_heartbeats().await },
        ));
        tasks.push(self.spawn_ticker(
            self.config.sweep_interval,
            shutdown_rx.clone(),
            |net| async move {
                net.sweep().await;
            },
        ));
        tasks.push(self.spawn_ticker(
            self.config.announce_interval,
            shutdown_rx,
            |net| async move {
                if let Err(e) = net.announce().await {
                    debug!(error = %e, "Announcement failed");
                }
            },
        ));

        info!(address = %self.address(), transports = self.transports.len(), "Peer network started");
        *running = Some(Running { shutdown, tasks });
        Ok(())
    }

    /// Stop background tasks and transports; drops every channel
    pub async fn stop(&self) -> Result<(), NetworkError> {
        let running = self.running.lock().await.take().ok_or(NetworkError::NotRunning)?;
        let _ = running.shutdown.send(true);
        for task in running.tasks {
            let _ = task.await;
        }

        for transport in &self.transports {
            if let Err(e) = transport.stop().await {
                debug!(transport = transport.name(), error = %e, "Transport stop failed");
            }
        }

        let mut state = self.state.lock().await;
        for channel in state.channels.values() {
            channel.close();
        }
        state.channels.clear();
        state.requests.clear();

        info!(address = %self.address(), "Peer network stopped");
        Ok(())
    }

    fn spawn_ticker<F, Fut>(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut tick: F,
    ) -> JoinHandle<()>
    where
        F: FnMut(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let net = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => tick(Arc::clone(&net)).await,
                }
            }
        })
    }

    // ========================================================================
    // OUTBOUND
    // ========================================================================

    /// Broadcast a signed discovery announcement on every transport
    pub async fn announce(&self) -> Result<usize, NetworkError> {
        let message = P2PMessage::signed(
            &self.keypair,
            None,
            Payload::Discovery(DiscoveryPayload {
                verifier: self.keypair.public_key(),
                device: self.config.device.clone(),
            }),
        );
        let frame = message.to_bytes()?;

        let mut reached = 0;
        for transport in &self.transports {
            match transport.broadcast(&frame).await {
                Ok(count) => reached += count,
                Err(e) => debug!(transport = transport.name(), error = %e, "Broadcast failed"),
            }
        }
        Ok(reached)
    }

    /// Relay a transaction to a trusted peer. Returns false if the peer has
    /// no open channel or the send fails.
    pub async fn send_transaction(&self, peer: &Address, tx: &Transaction) -> bool {
        match self.try_send_transaction(peer, tx).await {
            Ok(()) => true,
            Err(e) => {
                warn!(peer = %peer, id = tx.id(), error = %e, "Transaction relay failed");
                false
            }
        }
    }

    pub async fn try_send_transaction(
        &self,
        peer: &Address,
        tx: &Transaction,
    ) -> Result<(), NetworkError> {
        let state = self.state.lock().await;
        let record = state
            .registry
            .get(peer)
            .ok_or_else(|| NetworkError::PeerUnavailable(peer.to_string()))?;
        let session_key = match (record.is_trusted(), record.session_key()) {
            (true, Some(key)) => key,
            _ => return Err(NetworkError::NotTrusted(peer.to_string())),
        };
        let channel = state
            .open_channel(peer)
            .ok_or_else(|| NetworkError::PeerUnavailable(peer.to_string()))?;

        let envelope = Cipher::encrypt(&TransactionCodec::encode(tx)?, session_key)?;
        let message = P2PMessage::signed(
            &self.keypair,
            Some(peer.clone()),
            Payload::Transaction(TransactionPayload { envelope }),
        );
        channel.try_send(message.to_bytes()?)?;

        debug!(peer = %peer, id = tx.id(), "Transaction relayed");
        Ok(())
    }

    /// Relay to every trusted peer; returns how many sends succeeded
    pub async fn broadcast_transaction(&self, tx: &Transaction) -> usize {
        let trusted: Vec<Address> = {
            let state = self.state.lock().await;
            state.registry.trusted().iter().map(|p| p.id().clone()).collect()
        };

        let mut sent = 0;
        for peer in &trusted {
            if self.send_transaction(peer, tx).await {
                sent += 1;
            }
        }
        sent
    }

    /// Ask a trusted peer for its chain, waiting at most `request_timeout`
    pub async fn request_chain(&self, peer: &Address) -> Result<ChainSnapshot, NetworkError> {
        let request_id = new_id();
        let (reply, response) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            match state.registry.get(peer) {
                Some(p) if p.is_trusted() => {}
                Some(_) => return Err(NetworkError::NotTrusted(peer.to_string())),
                None => return Err(NetworkError::PeerUnavailable(peer.to_string())),
            }
            let channel = state
                .open_channel(peer)
                .ok_or_else(|| NetworkError::PeerUnavailable(peer.to_string()))?;

            let message = P2PMessage::signed(
                &self.keypair,
                Some(peer.clone()),
                Payload::Sync(SyncPayload::Request {
                    request_id: request_id.clone(),
                }),
            );
            channel.try_send(message.to_bytes()?)?;
            state.requests.insert(
                request_id.clone(),
                PendingRequest {
                    peer: peer.clone(),
                    reply,
                },
            );
        }

        match tokio::time::timeout(self.config.request_timeout, response).await {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(_)) => Err(NetworkError::RequestCancelled),
            Err(_) => {
                self.state.lock().await.requests.remove(&request_id);
                Err(NetworkError::Timeout(peer.to_string()))
            }
        }
    }

    /// Mark silent peers stale and heartbeat every trusted peer
    pub async fn send_heartbeats(&self) {
        let chain_height = self.ledger.read().await.height();
        let mut state = self.state.lock().await;
        let marked = state
            .registry
            .mark_stale_at(now_millis(), self.config.staleness_window);
        if marked > 0 {
            debug!(marked, "Peers went stale");
        }

        let trusted: Vec<Address> = state.registry.trusted().iter().map(|p| p.id().clone()).collect();
        for peer in trusted {
            let Some(channel) = state.open_channel(&peer) else {
                continue;
            };
            let message = P2PMessage::signed(
                &self.keypair,
                Some(peer.clone()),
                Payload::Heartbeat(HeartbeatPayload { chain_height }),
            );
            match message.to_bytes() {
                Ok(frame) => {
                    if let Err(e) = channel.try_send(frame) {
                        debug!(peer = %peer, error = %e, "Heartbeat not sent");
                    }
                }
                Err(e) => debug!(error = %e, "Heartbeat encoding failed"),
            }
        }
    }

    /// Evict peers silent for longer than the staleness window
    pub async fn sweep(&self) -> Vec<Address> {
        self.sweep_at(now_millis()).await
    }

    pub async fn sweep_at(&self, now: i64) -> Vec<Address> {
        let mut state = self.state.lock().await;
        let evicted = state
            .registry
            .sweep_stale_at(now, self.config.staleness_window);
        for id in &evicted {
            state.evict(id);
            info!(peer = %id, "Evicted stale peer");
        }
        evicted
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Every known peer, whatever its state
    pub async fn get_peers(&self) -> Vec<Peer> {
        let state = self.state.lock().await;
        state.registry.all().into_iter().cloned().collect()
    }

    /// Trusted peers with an open channel
    pub async fn get_connected_peers(&self) -> Vec<Peer> {
        let state = self.state.lock().await;
        state
            .registry
            .trusted()
            .into_iter()
            .filter(|p| state.open_channel(p.id()).is_some())
            .cloned()
            .collect()
    }

    pub async fn peer(&self, id: &Address) -> Option<Peer> {
        self.state.lock().await.registry.get(id).cloned()
    }

    // ========================================================================
    // INBOUND
    // ========================================================================

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Frame {
                transport,
                link,
                bytes,
                distance,
            } => {
                if let Err(e) = self.handle_frame(&transport, &link, &bytes, distance).await {
                    warn!(transport = %transport, link = %link, error = %e, "Dropped inbound message");
                }
            }
            TransportEvent::Closed { transport, link } => {
                let mut state = self.state.lock().await;
                let closed: Vec<Address> = state
                    .registry
                    .all()
                    .into_iter()
                    .filter(|p| p.transport() == transport && p.link() == link)
                    .map(|p| p.id().clone())
                    .collect();
                for id in closed {
                    if let Some(channel) = state.channels.remove(&id) {
                        channel.close();
                        debug!(peer = %id, "Channel closed");
                    }
                }
            }
        }
    }

    /// Decode, verify and dispatch one frame. An error means the frame was
    /// dropped; it never affects other peers.
    pub async fn handle_frame(
        &self,
        transport: &str,
        link: &str,
        bytes: &[u8],
        distance: Option<f32>,
    ) -> Result<MessageType, NetworkError> {
        let message = P2PMessage::from_bytes(bytes)?;
        let local = self.address();
        if message.from == local {
            return Err(NetworkError::Rejected("own message".to_string()));
        }
        if message.to.as_ref().is_some_and(|to| to != &local) {
            return Err(NetworkError::Rejected("addressed to another wallet".to_string()));
        }

        let mut state = self.state.lock().await;

        let verifier = match message.embedded_verifier() {
            Some(verifier) => {
                if Address::from_public_key(verifier) != message.from {
                    return Err(NetworkError::Rejected(
                        "verifier does not match sender address".to_string(),
                    ));
                }
                verifier.clone()
            }
            None => state
                .registry
                .get(&message.from)
                .map(|p| p.verifier().clone())
                .ok_or_else(|| NetworkError::Rejected(format!("unknown sender {}", message.from)))?,
        };
        message
            .verify(&verifier)
            .map_err(|e| NetworkError::Rejected(e.to_string()))?;

        let rerouted = match state.registry.get_mut(&message.from) {
            Some(peer) => {
                let rerouted = peer.transport() != transport || peer.link() != link;
                peer.touch(now_millis());
                peer.set_distance(distance);
                peer.set_route(transport, link);
                rerouted
            }
            None => false,
        };
        if rerouted {
            state.evict_channel(&message.from);
        }

        // A trusted peer heard again after its channel dropped gets a fresh
        // handshake, which reopens channels on both ends
        let reconnect = !matches!(message.payload, Payload::Handshake(_))
            && state.registry.get(&message.from).is_some_and(|p| p.is_trusted())
            && state.open_channel(&message.from).is_none();
        if reconnect {
            match self.send_handshake(&mut state, &message.from, false).await {
                Ok(()) => debug!(peer = %message.from, "Re-handshaking trusted peer"),
                Err(e) => debug!(peer = %message.from, error = %e, "Re-handshake failed"),
            }
        }

        let message_type = message.message_type();
        let from = message.from.clone();
        match message.payload {
            Payload::Discovery(discovery) => {
                let mut peer = Peer::new(from.clone(), discovery.verifier, transport, link);
                peer.set_device(discovery.device);
                peer.set_distance(distance);
                state.registry.upsert(peer);

                let needs_handshake = state
                    .registry
                    .get(&from)
                    .is_some_and(|p| p.state() == PeerState::Discovered);
                if needs_handshake {
                    self.send_handshake(&mut state, &from, false).await?;
                    if let Some(peer) = state.registry.get_mut(&from) {
                        peer.begin_handshake();
                    }
                    debug!(peer = %from, "Handshake started");
                }
            }

            Payload::Handshake(handshake) => {
                self.accept_handshake(&mut state, &from, handshake, transport, link, distance)
                    .await?;
            }

            Payload::Transaction(payload) => {
                let session_key = state
                    .registry
                    .get(&from)
                    .filter(|p| p.is_trusted())
                    .and_then(|p| p.session_key().cloned())
                    .ok_or_else(|| NetworkError::NotTrusted(from.to_string()))?;
                drop(state);

                let plaintext = Cipher::decrypt(&payload.envelope, &session_key)
                    .map_err(|e| NetworkError::Rejected(e.to_string()))?;
                let tx = TransactionCodec::decode(&plaintext)?;
                TransactionValidator::validate(&tx)
                    .map_err(|e| NetworkError::Rejected(e.to_string()))?;

                match self
                    .queue
                    .enqueue_received(&tx, self.keypair.secret(), Origin::Peer(from.clone()))
                {
                    Ok(_) => info!(peer = %from, id = tx.id(), "Received transaction queued"),
                    Err(QueueError::Duplicate(id)) => debug!(id = %id, "Transaction already queued"),
                    Err(e) => return Err(NetworkError::Rejected(e.to_string())),
                }
            }

            Payload::Sync(SyncPayload::Request { request_id }) => {
                if !state.registry.get(&from).is_some_and(|p| p.is_trusted()) {
                    return Err(NetworkError::NotTrusted(from.to_string()));
                }
                let snapshot = self.ledger.read().await.export_snapshot();
                let reply = P2PMessage::signed(
                    &self.keypair,
                    Some(from.clone()),
                    Payload::Sync(SyncPayload::Response {
                        request_id,
                        snapshot,
                    }),
                );
                let channel = self.ensure_channel(&mut state, &from).await?;
                channel.try_send(reply.to_bytes()?)?;
            }

            Payload::Sync(SyncPayload::Response {
                request_id,
                snapshot,
            }) => {
                let matches = state
                    .requests
                    .get(&request_id)
                    .is_some_and(|r| r.peer == from);
                if !matches {
                    return Err(NetworkError::Rejected(format!(
                        "unsolicited sync response {request_id}"
                    )));
                }
                if let Some(request) = state.requests.remove(&request_id) {
                    let _ = request.reply.send(snapshot);
                }
            }

            Payload::Heartbeat(heartbeat) => {
                if let Some(peer) = state.registry.get_mut(&from) {
                    peer.set_chain_height(heartbeat.chain_height);
                }
            }
        }

        Ok(message_type)
    }

    async fn accept_handshake(
        &self,
        state: &mut NetworkState,
        from: &Address,
        handshake: HandshakePayload,
        transport: &str,
        link: &str,
        distance: Option<f32>,
    ) -> Result<(), NetworkError> {
        if !compatible_version(&handshake.version, &self.config.protocol_version) {
            return Err(NetworkError::Rejected(format!(
                "incompatible protocol version {}",
                handshake.version
            )));
        }

        let mut peer = Peer::new(from.clone(), handshake.verifier.clone(), transport, link);
        peer.set_device(handshake.device.clone());
        peer.set_distance(distance);
        state.registry.upsert(peer);

        let session_key = self.keypair.session_key(&handshake.agreement_key);
        if let Some(peer) = state.registry.get_mut(from) {
            peer.trust(
                handshake.agreement_key,
                session_key,
                handshake.version,
                handshake.capabilities,
            );
        }
        info!(peer = %from, "Peer trusted");

        if handshake.reply {
            self.ensure_channel(state, from).await?;
        } else {
            self.send_handshake(state, from, true).await?;
        }
        Ok(())
    }

    async fn send_handshake(
        &self,
        state: &mut NetworkState,
        peer: &Address,
        reply: bool,
    ) -> Result<(), NetworkError> {
        let message = P2PMessage::signed(
            &self.keypair,
            Some(peer.clone()),
            Payload::Handshake(HandshakePayload {
                verifier: self.keypair.public_key(),
                agreement_key: self.keypair.agreement_public_key(),
                version: self.config.protocol_version.clone(),
                capabilities: self.config.capabilities.clone(),
                device: self.config.device.clone(),
                reply,
            }),
        );
        let channel = self.ensure_channel(state, peer).await?;
        channel.try_send(message.to_bytes()?)?;
        Ok(())
    }

    /// Reuse the open channel to a peer, or open one over its last route
    async fn ensure_channel(
        &self,
        state: &mut NetworkState,
        peer: &Address,
    ) -> Result<Arc<dyn PeerChannel>, NetworkError> {
        if let Some(channel) = state.open_channel(peer) {
            return Ok(channel);
        }

        let (name, link) = state
            .registry
            .get(peer)
            .map(|p| (p.transport().to_string(), p.link().to_string()))
            .ok_or_else(|| NetworkError::PeerUnavailable(peer.to_string()))?;
        let transport = self
            .transport(&name)
            .ok_or_else(|| NetworkError::UnknownTransport(name.clone()))?;

        let channel = transport.open(&link).await?;
        state.channels.insert(peer.clone(), Arc::clone(&channel));
        Ok(channel)
    }
}

/// Same major version
fn compatible_version(theirs: &str, ours: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_string);
    major(theirs) == major(ours)
}
