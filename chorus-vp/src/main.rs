//! Voice Player (chorus-vp) - Main entry point
//!
//! Loads the bootstrap configuration, wires the decoder, the UDP voice
//! transport and the session manager together and serves the HTTP control
//! API until Ctrl+C / SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chorus_vp::api::{self, AppContext};
use chorus_vp::audio::ProcessSourceFactory;
use chorus_vp::config::TomlConfig;
use chorus_vp::playback::EngineDeps;
use chorus_vp::session::{SessionManager, StaticTargets};
use chorus_vp::transport::UdpConnector;
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Capacity of the shared event bus; slow SSE clients lag past this
const EVENT_BUS_CAPACITY: usize = 1024;

/// Command-line arguments for chorus-vp
#[derive(Parser, Debug)]
#[command(name = "chorus-vp")]
#[command(about = "Voice channel playback service for Chorus")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "CHORUS_PORT")]
    port: Option<u16>,

    /// Path to the TOML config file
    #[arg(short, long, env = "CHORUS_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Loaded before tracing init so `[logging] level` applies
    let (config, source) =
        TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = args.port.unwrap_or(config.port);
    info!("Starting Chorus Voice Player on port {}", port);
    match source.path() {
        Some(path) => info!("Configuration: {}", path.display()),
        None => warn!("Configuration: built-in defaults"),
    }

    let targets = Arc::new(StaticTargets::from_config(config.targets.clone()));
    info!("Voice targets configured: {}", targets.len().await);

    let engine_config = config.engine.clone();
    let sources = Arc::new(ProcessSourceFactory::new(config.decoder.clone(), engine_config.format));
    let connector = Arc::new(UdpConnector::new(
        engine_config.format,
        engine_config.connect_timeout(),
        engine_config.heartbeat_timeout(),
    ));
    let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);

    let manager = SessionManager::new(
        engine_config,
        config.manager.clone(),
        EngineDeps {
            sources,
            connector,
            targets,
            events,
        },
    );
    let sweeper = manager.spawn_idle_sweeper();

    api::serve(AppContext { manager: manager.clone() }, port, shutdown_signal())
        .await
        .context("HTTP server error")?;

    manager.shutdown().await;
    if let Err(e) = sweeper.await {
        warn!("Idle sweeper ended abnormally: {}", e);
    }
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
