use crate::network::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Optional description of the device a wallet runs on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub platform: String,
}

impl DeviceInfo {
    pub fn new(name: &str, platform: &str) -> Self {
        Self {
            name: name.to_string(),
            platform: platform.to_string(),
        }
    }
}

/// Configuration for the peer network
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// How often each trusted peer gets a heartbeat
    pub heartbeat_interval: Duration,
    /// How often stale peers are evicted
    pub sweep_interval: Duration,
    /// How often the discovery announcement is rebroadcast
    pub announce_interval: Duration,
    /// Silence tolerated from a peer before eviction
    pub staleness_window: Duration,
    /// Deadline for request/response exchanges
    pub request_timeout: Duration,
    pub protocol_version: String,
    pub device: Option<DeviceInfo>,
    pub capabilities: BTreeSet<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30),
            announce_interval: Duration::from_secs(30),
            staleness_window: Duration::from_secs(120),
            request_timeout: Duration::from_secs(10),
            protocol_version: PROTOCOL_VERSION.to_string(),
            device: None,
            capabilities: ["transactions", "sync"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl NetworkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }

    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.insert(capability.to_string());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("sweep_interval", self.sweep_interval),
            ("announce_interval", self.announce_interval),
            ("staleness_window", self.staleness_window),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(format!("{name} must be > 0"));
            }
        }
        if self.staleness_window <= self.heartbeat_interval {
            return Err("staleness_window must exceed heartbeat_interval".to_string());
        }
        Ok(())
    }
}
