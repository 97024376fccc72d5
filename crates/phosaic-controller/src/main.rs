//! Phosaic controller CLI entry point

use std::sync::Arc;

use clap::Parser;
use phosaic_core::webrtc_peer::{WebRtcPeerFactory, DEFAULT_STUN_SERVER};
use phosaic_core::{CoordinatorClient, WsConnector};
use phosaic_proto::SessionId;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "phosaic-controller")]
#[command(about = "Connect to a Phosaic display by its pairing id and open a data channel")]
struct Cli {
    /// Session id shown by the display
    id: String,

    /// Relay WebSocket URL
    #[arg(short, long, env = "PHOSAIC_RELAY_URL", default_value = "ws://localhost:3000")]
    relay: String,

    /// STUN server (repeatable)
    #[arg(long = "stun", default_value = DEFAULT_STUN_SERVER)]
    stun_servers: Vec<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("Connecting to display {} via {}", cli.id, cli.relay);

    let mut client = CoordinatorClient::new(
        SessionId::new(cli.id),
        Arc::new(WsConnector::new(cli.relay)),
        Arc::new(WebRtcPeerFactory::new(cli.stun_servers)),
    );

    let result = tokio::select! {
        result = client.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };
    // The peer connection is closed on every exit path.
    if let Err(e) = client.shutdown().await {
        error!("shutdown failed: {}", e);
    }
    if let Err(e) = &result {
        error!("controller stopped: {}", e);
    }
    result?;

    Ok(())
}
