// Peer Management - Known wallets and their handshake state
//
// Peers enter on a verified discovery announcement, become Trusted after a
// verified handshake, and are evicted (removed outright) once silent for
// longer than the staleness window.

use crate::clock::now_millis;
use crate::crypto::{Address, AgreementKey, PublicKey, SymmetricKey};
use crate::network::DeviceInfo;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Handshake progress of a peer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Announcement verified, no handshake yet
    Discovered,
    /// Our handshake is out, waiting for theirs
    Handshaking,
    /// Mutual handshake verified
    Trusted,
    /// Past the staleness window; evicted on the next sweep
    Stale,
}

/// Statistics about a peer registry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub total_peers: usize,
    pub discovered_peers: usize,
    pub handshaking_peers: usize,
    pub trusted_peers: usize,
    pub stale_peers: usize,
}

/// A known wallet
#[derive(Clone, Debug)]
pub struct Peer {
    id: Address,
    verifier: PublicKey,
    state: PeerState,
    last_seen: i64,
    distance: Option<f32>,
    device: Option<DeviceInfo>,
    agreement_key: Option<AgreementKey>,
    session_key: Option<SymmetricKey>,
    version: Option<String>,
    capabilities: BTreeSet<String>,
    /// (transport name, transport-specific link)
    route: (String, String),
    chain_height: Option<u64>,
}

impl Peer {
    pub fn new(id: Address, verifier: PublicKey, transport: &str, link: &str) -> Self {
        Self {
            id,
            verifier,
            state: PeerState::Discovered,
            last_seen: now_millis(),
            distance: None,
            device: None,
            agreement_key: None,
            session_key: None,
            version: None,
            capabilities: BTreeSet::new(),
            route: (transport.to_string(), link.to_string()),
            chain_height: None,
        }
    }

    /// Advertised address
    pub fn id(&self) -> &Address {
        &self.id
    }

    pub fn verifier(&self) -> &PublicKey {
        &self.verifier
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_trusted(&self) -> bool {
        self.state == PeerState::Trusted
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen
    }

    pub fn distance(&self) -> Option<f32> {
        self.distance
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    pub fn agreement_key(&self) -> Option<&AgreementKey> {
        self.agreement_key.as_ref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    pub fn transport(&self) -> &str {
        &self.route.0
    }

    pub fn link(&self) -> &str {
        &self.route.1
    }

    pub fn chain_height(&self) -> Option<u64> {
        self.chain_height
    }

    pub(crate) fn session_key(&self) -> Option<&SymmetricKey> {
        self.session_key.as_ref()
    }

    /// Any message from the peer proves it is alive
    pub fn touch(&mut self, now: i64) {
        self.last_seen = now;
        if self.state == PeerState::Stale {
            self.state = if self.session_key.is_some() {
                PeerState::Trusted
            } else {
                PeerState::Discovered
            };
        }
    }

    pub(crate) fn set_route(&mut self, transport: &str, link: &str) {
        self.route = (transport.to_string(), link.to_string());
    }

    pub(crate) fn set_distance(&mut self, distance: Option<f32>) {
        if distance.is_some() {
            self.distance = distance;
        }
    }

    pub(crate) fn set_device(&mut self, device: Option<DeviceInfo>) {
        if device.is_some() {
            self.device = device;
        }
    }

    pub(crate) fn set_chain_height(&mut self, height: u64) {
        self.chain_height = Some(height);
    }

    pub(crate) fn begin_handshake(&mut self) {
        if self.state == PeerState::Discovered {
            self.state = PeerState::Handshaking;
        }
    }

    /// Record a verified handshake and its derived session key
    pub(crate) fn trust(
        &mut self,
        agreement_key: AgreementKey,
        session_key: SymmetricKey,
        version: String,
        capabilities: BTreeSet<String>,
    ) {
        self.agreement_key = Some(agreement_key);
        self.session_key = Some(session_key);
        self.version = Some(version);
        self.capabilities = capabilities;
        self.state = PeerState::Trusted;
    }

    pub fn is_stale_at(&self, now: i64, window: Duration) -> bool {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(self.last_seen) > window_ms
    }
}

/// Registry of known peers keyed by address
#[derive(Clone, Debug)]
pub struct PeerRegistry {
    local: Address,
    peers: HashMap<Address, Peer>,
}

impl PeerRegistry {
    pub fn new(local: Address) -> Self {
        Self {
            local,
            peers: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn has_peer(&self, id: &Address) -> bool {
        self.peers.contains_key(id)
    }

    /// Insert a newly discovered peer, or refresh an existing one. Returns
    /// false for our own announcement.
    pub fn upsert(&mut self, peer: Peer) -> bool {
        if peer.id == self.local {
            return false;
        }
        match self.peers.get_mut(&peer.id) {
            Some(existing) => {
                existing.touch(peer.last_seen);
                existing.set_route(peer.transport(), peer.link());
                existing.set_device(peer.device);
                existing.set_distance(peer.distance);
            }
            None => {
                self.peers.insert(peer.id.clone(), peer);
            }
        }
        true
    }

    pub fn get(&self, id: &Address) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn get_mut(&mut self, id: &Address) -> Option<&mut Peer> {
        self.peers.get_mut(id)
    }

    pub fn remove(&mut self, id: &Address) -> Option<Peer> {
        self.peers.remove(id)
    }

    pub fn all(&self) -> Vec<&Peer> {
        self.peers.values().collect()
    }

    pub fn by_state(&self, state: PeerState) -> Vec<&Peer> {
        self.peers.values().filter(|p| p.state == state).collect()
    }

    pub fn trusted(&self) -> Vec<&Peer> {
        self.by_state(PeerState::Trusted)
    }

    /// Mark peers silent past the window as stale
    pub fn mark_stale_at(&mut self, now: i64, window: Duration) -> usize {
        let mut marked = 0;
        for peer in self.peers.values_mut() {
            if peer.state != PeerState::Stale && peer.is_stale_at(now, window) {
                peer.state = PeerState::Stale;
                marked += 1;
            }
        }
        marked
    }

    /// Evict every peer silent past the window; returns the evicted ids
    pub fn sweep_stale_at(&mut self, now: i64, window: Duration) -> Vec<Address> {
        let stale: Vec<Address> = self
            .peers
            .values()
            .filter(|p| p.state == PeerState::Stale || p.is_stale_at(now, window))
            .map(|p| p.id.clone())
            .collect();

        for id in &stale {
            self.peers.remove(id);
        }
        stale
    }

    pub fn stats(&self) -> PeerStats {
        let mut stats = PeerStats {
            total_peers: self.peers.len(),
            ..PeerStats::default()
        };
        for peer in self.peers.values() {
            match peer.state {
                PeerState::Discovered => stats.discovered_peers += 1,
                PeerState::Handshaking => stats.handshaking_peers += 1,
                PeerState::Trusted => stats.trusted_peers += 1,
                PeerState::Stale => stats.stale_peers += 1,
            }
        }
        stats
    }
}
