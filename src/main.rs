//! Lumen Server
//!
//! REST bridge for Zigbee devices behind a zigbee2mqtt gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lumen::bridge::{
    spawn_inbound_reader, CorrelationBridge, EventLog, HealthMonitor, StateCache,
};
use lumen::config::Config;
use lumen::mqtt::{MqttTransport, TopicCodec};
use lumen::server::{create_router, AppState};

/// Lumen Zigbee REST bridge
#[derive(Parser, Debug)]
#[command(name = "lumen")]
#[command(about = "REST bridge for Zigbee devices via zigbee2mqtt", long_about = None)]
struct Args {
    /// Path to the configuration file (defaults to ./Lumen.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP bind address (host:port)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lumen=info,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting lumen v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.api.bind = bind;
    }
    if config.api.api_keys.is_empty() {
        warn!("no API keys configured; the API is unauthenticated");
    }

    // Core components
    let codec = TopicCodec::new(config.mqtt.base_topic.clone());
    let cache = Arc::new(StateCache::new());
    let events = Arc::new(EventLog::new(config.bridge.event_capacity));
    let health = Arc::new(HealthMonitor::new());

    let (transport, publisher, inbound_rx) =
        MqttTransport::connect(&config.mqtt, codec.clone(), health.clone());

    let bridge = Arc::new(CorrelationBridge::new(
        codec,
        Arc::new(publisher),
        cache.clone(),
        events.clone(),
        health.clone(),
        Duration::from_millis(config.bridge.default_timeout_ms),
    ));

    info!(
        host = %config.mqtt.host,
        port = config.mqtt.port,
        base_topic = %config.mqtt.base_topic,
        "starting MQTT transport"
    );
    tokio::spawn(transport.run());
    spawn_inbound_reader(bridge.clone(), inbound_rx);

    // HTTP surface
    let state = AppState::new(bridge, cache, events, health, config.api.clone());
    let app = create_router(state);

    let addr: SocketAddr = config.api.bind.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("API listening on http://{addr}");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
