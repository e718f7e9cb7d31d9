//! Agent configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use local_ip_address::list_afinet_netifas;
use roon_core::{DiscoveryConfig, ExtensionInfo};
use serde::Deserialize;

/// Agent configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name of the core to connect to when several answer discovery.
    /// Override: `ROON_AGENT_CORE_NAME`
    pub core_name: Option<String>,

    /// Connect to `host:port` directly instead of discovering.
    /// Override: `ROON_AGENT_CORE_ADDRESS`
    pub core_address: Option<SocketAddr>,

    /// Network interface (e.g. `eth0`) discovery queries go out on.
    /// Override: `ROON_AGENT_INTERFACE`
    pub interface: Option<String>,

    /// Per-reply discovery wait in milliseconds.
    pub discovery_timeout_ms: u64,

    /// Zones to follow, by display name. Empty follows every zone.
    pub zones: Vec<String>,

    /// Name shown in the core's extension list. Defaults to one that includes
    /// the host name.
    pub display_name: Option<String>,

    /// Directory holding `Configuration.json` (tokens, paired core).
    /// Override: `ROON_AGENT_DATA_DIR`
    pub data_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            core_name: None,
            core_address: None,
            interface: None,
            discovery_timeout_ms: 5000,
            zones: Vec::new(),
            display_name: None,
            data_dir: PathBuf::from("."),
        }
    }
}

impl AgentConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ROON_AGENT_CORE_NAME") {
            if !val.is_empty() {
                self.core_name = Some(val);
            }
        }

        if let Ok(val) = std::env::var("ROON_AGENT_CORE_ADDRESS") {
            if let Ok(addr) = val.parse() {
                self.core_address = Some(addr);
            }
        }

        if let Ok(val) = std::env::var("ROON_AGENT_INTERFACE") {
            if !val.is_empty() {
                self.interface = Some(val);
            }
        }

        // Note: ROON_AGENT_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    pub fn validate(&self) -> Result<()> {
        if self.discovery_timeout_ms == 0 {
            bail!("discovery_timeout_ms must be > 0");
        }
        if self.zones.iter().any(|z| z.trim().is_empty()) {
            bail!("zone names must not be empty");
        }
        if matches!(&self.display_name, Some(name) if name.trim().is_empty()) {
            bail!("display_name must not be empty");
        }
        Ok(())
    }

    /// Discovery settings, with the configured interface resolved to its
    /// IPv4 address.
    pub fn discovery_config(&self) -> Result<DiscoveryConfig> {
        let bind_address = match &self.interface {
            Some(name) => interface_address(name)?,
            None => Ipv4Addr::UNSPECIFIED,
        };
        Ok(DiscoveryConfig {
            bind_address,
            timeout: Duration::from_millis(self.discovery_timeout_ms),
            ..DiscoveryConfig::default()
        })
    }

    /// Registration metadata for this agent.
    pub fn extension_info(&self) -> ExtensionInfo {
        let display_name = self.display_name.clone().unwrap_or_else(|| {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            format!("Roon Agent ({})", host)
        });
        ExtensionInfo {
            display_name,
            publisher: "Roon Agent".to_string(),
            ..ExtensionInfo::default()
        }
    }
}

/// First IPv4 address of the named interface.
fn interface_address(name: &str) -> Result<Ipv4Addr> {
    let interfaces = list_afinet_netifas().context("Failed to list network interfaces")?;
    interfaces
        .into_iter()
        .find_map(|(iface, addr)| match addr {
            IpAddr::V4(ipv4) if iface == name => Some(ipv4),
            _ => None,
        })
        .with_context(|| format!("Interface '{}' has no IPv4 address", name))
}
