//! Shared types for core discovery.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to create or bind the UDP socket.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Failed to send the multicast query.
    #[error("failed to send SOOD query: {0}")]
    Send(#[source] std::io::Error),

    /// A query field does not fit the TLV length prefixes.
    #[error("SOOD field '{name}' is too long ({len} bytes)")]
    FieldTooLong {
        /// Field name.
        name: String,
        /// Offending length in bytes.
        len: usize,
    },

    /// No core answered the query.
    #[error("no core found")]
    NoCoreFound,

    /// Several cores answered and none matched the requested name.
    #[error("multiple cores found ({}), configure a core name", candidates.join(", "))]
    AmbiguousCore {
        /// Display names of all candidates.
        candidates: Vec<String>,
    },
}

/// A core that answered a SOOD query.
///
/// One result per responder address. Fields the core did not send keep their
/// defaults (empty string, port 0).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    /// Display name of the core.
    pub core_name: String,
    /// Source address of the reply.
    pub core_address: IpAddr,
    /// Version string of the core software.
    pub display_version: String,
    /// Stable identifier of the core installation.
    pub unique_id: String,
    /// Service id the core answered for.
    pub service_id: String,
    /// Correlation id echoed back from the query (`_tid`).
    pub correlation_id: String,
    /// Raw TCP port.
    pub tcp_port: u16,
    /// HTTP port hosting the WebSocket API.
    pub http_port: u16,
}

impl DiscoveryResult {
    /// Builds a result from decoded TLV fields and the responder address.
    pub fn from_fields(core_address: IpAddr, fields: &HashMap<String, String>) -> Self {
        let text = |key: &str| fields.get(key).cloned().unwrap_or_default();
        let port = |key: &str| {
            fields
                .get(key)
                .and_then(|v| v.trim().parse::<u16>().ok())
                .unwrap_or(0)
        };

        Self {
            core_name: text("name"),
            core_address,
            display_version: text("display_version"),
            unique_id: text("unique_id"),
            service_id: text("service_id"),
            correlation_id: text("_tid"),
            tcp_port: port("tcp_port"),
            http_port: port("http_port"),
        }
    }

    /// WebSocket URL of the core's MOO/1 endpoint.
    pub fn ws_url(&self) -> String {
        format!(
            "ws://{}:{}{}",
            self.core_address,
            self.http_port,
            crate::protocol_constants::WS_API_PATH
        )
    }
}

impl Default for DiscoveryResult {
    fn default() -> Self {
        Self {
            core_name: String::new(),
            core_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            display_version: String::new(),
            unique_id: String::new(),
            service_id: String::new(),
            correlation_id: String::new(),
            tcp_port: 0,
            http_port: 0,
        }
    }
}

/// Picks the core to connect to from a finished query.
///
/// An exact name match wins. Without one, a single candidate is accepted;
/// several candidates are an error so the user can disambiguate.
pub fn select_core(
    results: Vec<DiscoveryResult>,
    core_name: Option<&str>,
) -> Result<DiscoveryResult, DiscoveryError> {
    if let Some(name) = core_name {
        if let Some(found) = results.iter().find(|r| r.core_name == name) {
            return Ok(found.clone());
        }
    }

    let mut results = results;
    match results.len() {
        0 => Err(DiscoveryError::NoCoreFound),
        1 => Ok(results.remove(0)),
        _ => Err(DiscoveryError::AmbiguousCore {
            candidates: results.into_iter().map(|r| r.core_name).collect(),
        }),
    }
}
