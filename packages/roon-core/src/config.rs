//! Configuration for discovery, the session engine and extension registration.
//!
//! All structs carry sensible defaults and a `validate()` that rejects values
//! which would break the runtime (zero timeouts, empty ids, zero channel
//! capacity).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    ROON_CORE_SERVICE_ID, SERVICE_PAIRING, SERVICE_PING, SERVICE_STATUS, SERVICE_TRANSPORT,
    SOOD_MULTICAST_IP, SOOD_PORT,
};

// ─────────────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for a SOOD query.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Local interface address the query socket binds to.
    pub bind_address: Ipv4Addr,

    /// Where queries are sent. Defaults to the SOOD multicast group.
    pub target: SocketAddr,

    /// How long to wait for each reply before the query ends.
    pub timeout: Duration,

    /// Service id to query for.
    pub service_id: String,
}

impl DiscoveryConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout.is_zero() {
            return Err("discovery timeout must be > 0".to_string());
        }
        if self.service_id.is_empty() {
            return Err("service_id must not be empty".to_string());
        }
        Ok(())
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let [a, b, c, d] = SOOD_MULTICAST_IP;
        Self {
            bind_address: Ipv4Addr::UNSPECIFIED,
            target: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), SOOD_PORT)),
            timeout: Duration::from_millis(5000),
            service_id: ROON_CORE_SERVICE_ID.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning for the connection loop and outbound path.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay before reconnecting after a session that carried traffic.
    pub short_backoff: Duration,

    /// Delay before reconnecting after a session that died early.
    pub long_backoff: Duration,

    /// More frames than this since the connect attempt selects `short_backoff`.
    pub busy_frame_threshold: u64,

    /// How long a send waits for a transport to be installed.
    pub send_wait_timeout: Duration,

    /// Capacity of the session event broadcast channel.
    pub event_channel_capacity: usize,
}

impl SessionConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.short_backoff.is_zero() || self.long_backoff.is_zero() {
            return Err("backoff delays must be > 0".to_string());
        }
        if self.send_wait_timeout.is_zero() {
            return Err("send_wait_timeout must be > 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }

    /// Picks the reconnect delay for a session that received `frames` frames.
    pub fn backoff_for(&self, frames: u64) -> Duration {
        if frames > self.busy_frame_threshold {
            self.short_backoff
        } else {
            self.long_backoff
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            short_backoff: Duration::from_secs(1),
            long_backoff: Duration::from_secs(60),
            busy_frame_threshold: 10,
            send_wait_timeout: Duration::from_secs(120),
            event_channel_capacity: 100,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extension Registration
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata sent with `registry:1/register`.
///
/// `token` is not part of this struct; the session adds the stored token for
/// the core it is talking to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub extension_id: String,
    pub display_name: String,
    pub display_version: String,
    pub publisher: String,
    pub email: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub required_services: Vec<String>,
    #[serde(default)]
    pub optional_services: Vec<String>,
    #[serde(default)]
    pub provided_services: Vec<String>,
}

impl ExtensionInfo {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.extension_id.is_empty() {
            return Err("extension_id must not be empty".to_string());
        }
        if self.display_name.is_empty() {
            return Err("display_name must not be empty".to_string());
        }
        Ok(())
    }

    /// Whether the extension advertises `service`.
    pub fn provides(&self, service: &str) -> bool {
        self.provided_services.iter().any(|s| s == service)
    }
}

impl Default for ExtensionInfo {
    fn default() -> Self {
        Self {
            extension_id: "com.example.roon-agent".to_string(),
            display_name: "Roon Agent".to_string(),
            display_version: env!("CARGO_PKG_VERSION").to_string(),
            publisher: "roon-agent".to_string(),
            email: String::new(),
            website: String::new(),
            required_services: vec![SERVICE_TRANSPORT.to_string()],
            optional_services: Vec::new(),
            provided_services: vec![
                SERVICE_PAIRING.to_string(),
                SERVICE_PING.to_string(),
                SERVICE_STATUS.to_string(),
            ],
        }
    }
}
