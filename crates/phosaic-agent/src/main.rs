use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use phosaic_agent::{AgentConfig, ConsoleDisplay};
use phosaic_core::webrtc_peer::WebRtcPeerFactory;
use phosaic_core::{
    AgentParts, FixedGeometry, PairingDisplay, SubordinateAgent, SvgFilePairing, TerminalPairing, WsConnector,
};
use phosaic_proto::DisplayGeometry;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "phosaic-agent")]
#[command(about = "Phosaic display agent - shows a pairing code and answers coordinator offers")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay WebSocket URL (overrides the configuration)
    #[arg(short, long)]
    relay: Option<String>,

    /// Write the pairing code to this SVG file instead of the terminal
    #[arg(long, value_name = "PATH")]
    pairing_svg: Option<PathBuf>,

    /// Log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => AgentConfig::load_from_file(path)?,
        None => AgentConfig::load_from_env()?,
    };
    if let Some(relay) = args.relay {
        config.relay_url = relay;
        config.validate()?;
    }

    // Initialize tracing
    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if args.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting phosaic-agent, relay {}", config.relay_url);

    let pairing: Arc<dyn PairingDisplay> = match args.pairing_svg {
        Some(path) => Arc::new(SvgFilePairing::new(path)),
        None => Arc::new(TerminalPairing),
    };

    let geometry = DisplayGeometry::new(config.display.width, config.display.height)?;
    let mut agent = SubordinateAgent::new(AgentParts {
        environment: Arc::new(ConsoleDisplay::stdin(config.display.fullscreen)),
        geometry: Arc::new(FixedGeometry(geometry)),
        settle: config.settle.to_settle_config(),
        signaling: Arc::new(WsConnector::new(config.relay_url.clone())),
        peers: Arc::new(WebRtcPeerFactory::new(config.stun_servers.clone())),
        pairing,
    });

    tokio::select! {
        result = agent.run() => {
            if let Err(e) = &result {
                error!("agent stopped: {}", e);
            }
            result?;
            info!("signaling connection closed, exiting");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("phosaic-agent stopped");
    Ok(())
}
