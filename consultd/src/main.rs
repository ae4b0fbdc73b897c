use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signaling::Coordinator;

mod participant;

#[derive(Parser, Debug)]
#[command(name = "consultd")]
#[command(about = "Video consultation signaling coordinator and headless participant")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the signaling coordinator
    Serve {
        /// Listen address for the WebSocket endpoint
        #[arg(long, env = "CONSULTD_LISTEN", default_value = "0.0.0.0:3000")]
        listen: SocketAddr,
    },
    /// Join a consultation room as a headless participant (synthetic media)
    Join {
        /// Coordinator WebSocket URL
        #[arg(long, env = "CONSULTD_URL", default_value = "ws://localhost:3000/ws")]
        url: String,

        /// Room ID (appointment ID)
        #[arg(long, env = "CONSULTD_ROOM")]
        room: String,

        /// Display name used as chat sender
        #[arg(long, env = "CONSULTD_NAME", default_value = "participant")]
        name: String,

        /// Negotiation timeout in seconds (0 disables)
        #[arg(long, env = "CONSULTD_NEGOTIATION_TIMEOUT", default_value_t = 30)]
        negotiation_timeout: u64,

        /// STUN/TURN server URLs
        #[arg(
            long,
            env = "CONSULTD_ICE",
            value_delimiter = ',',
            default_value = "stun:stun.l.google.com:19302"
        )]
        ice: Vec<String>,

        /// Include loopback ICE candidates (same-host testing)
        #[arg(long)]
        loopback: bool,

        /// Base URL of the booking service receiving recording URLs
        #[arg(long, env = "CONSULTD_RECORDING_SINK")]
        recording_sink: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ログ設定
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("Log Level: {}", args.log_level);

    match args.command {
        Command::Serve { listen } => serve(listen).await,
        Command::Join {
            url,
            room,
            name,
            negotiation_timeout,
            ice,
            loopback,
            recording_sink,
        } => {
            let options = participant::JoinOptions {
                url,
                room,
                name,
                negotiation_timeout: (negotiation_timeout > 0)
                    .then(|| Duration::from_secs(negotiation_timeout)),
                ice_servers: ice,
                include_loopback: loopback,
                recording_sink,
            };
            participant::run(options).await
        }
    }
}

async fn serve(listen: SocketAddr) -> Result<()> {
    let coordinator = Arc::new(Coordinator::new());
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!("Signaling coordinator listening on {}", listen);

    tokio::select! {
        result = signaling::serve(listener, coordinator.clone()) => match result {
            Ok(()) => info!("Coordinator finished"),
            Err(e) => tracing::error!("Coordinator error: {:#}", e),
        },
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested ({} rooms active)", coordinator.rooms().len());
        }
    }

    info!("Coordinator stopped");
    Ok(())
}
