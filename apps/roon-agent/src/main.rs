//! Roon Agent - headless Roon extension.
//!
//! Finds a Roon core on the local network, registers with it and, once
//! paired, follows zone playback and reports the zone it is showing through
//! the extension status line.

mod config;
mod monitor;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use roon_core::protocol_constants::WS_API_PATH;
use roon_core::{
    select_core, ConfigStore, DiscoveryClient, LoggingEventEmitter, Session, SessionConfig,
    StatusService, TokioSpawner,
};
use tokio::signal;

use crate::config::AgentConfig;

/// Roon Agent - follows Roon zone playback from the command line.
#[derive(Parser, Debug)]
#[command(name = "roon-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ROON_AGENT_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Core to connect to by name (overrides config file).
    #[arg(short = 'n', long, env = "ROON_AGENT_CORE_NAME")]
    core_name: Option<String>,

    /// Zone to follow; repeat for several (overrides config file).
    #[arg(short = 'z', long = "zone")]
    zones: Vec<String>,

    /// Data directory for tokens and pairing state.
    #[arg(short = 'd', long, env = "ROON_AGENT_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Roon Agent v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        AgentConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(name) = args.core_name {
        config.core_name = Some(name);
    }
    if !args.zones.is_empty() {
        config.zones = args.zones;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    config.validate().context("Invalid configuration")?;

    let url = match config.core_address {
        Some(addr) => {
            log::info!("Using configured core at {}", addr);
            format!("ws://{}{}", addr, WS_API_PATH)
        }
        None => discover(&config).await?,
    };

    log::info!("Using data directory: {}", config.data_dir.display());
    let store = Arc::new(ConfigStore::new(&config.data_dir));
    let session = Session::new(SessionConfig::default(), config.extension_info(), store)
        .context("Failed to create session")?;
    session.set_event_emitter(Arc::new(LoggingEventEmitter));

    let status = StatusService::register(&session);
    status.set_status("Waiting for pairing", false).await;

    let monitor_handle = tokio::spawn(monitor::run(
        session.clone(),
        Arc::clone(&status),
        config.zones.clone(),
    ));
    session.start(&TokioSpawner::current(), url);

    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");
    session.close().await;
    if let Err(e) = monitor_handle.await {
        log::warn!("Monitor task ended abnormally: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Runs one SOOD query and picks the core to connect to.
async fn discover(config: &AgentConfig) -> Result<String> {
    let discovery = config.discovery_config()?;
    let mut client = DiscoveryClient::bind(&discovery).context("Failed to open discovery socket")?;

    log::info!("Searching for Roon cores...");
    let wanted = config.core_name.clone();
    let results = client
        .query(&discovery.service_id, discovery.timeout, |found| {
            wanted.as_deref() == Some(found.core_name.as_str())
        })
        .await
        .context("Discovery query failed")?;

    let core = select_core(results, config.core_name.as_deref()).context(
        "No usable Roon core. \
         Set --core-name or ROON_AGENT_CORE_NAME when several cores answer, \
         or core_address in the config file to skip discovery.",
    )?;
    log::info!(
        "Selected core '{}' ({}) at {}",
        core.core_name,
        core.display_version,
        core.core_address
    );
    Ok(core.ws_url())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
///
/// A signal that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
