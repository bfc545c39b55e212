//! Droplink relay server.
//!
//! Issues pairing codes and relays connection-setup messages between paired
//! devices. File bytes never pass through this process: once two devices
//! finish the relayed handshake, their transfer runs peer to peer.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the relay on the default port
//! droplink-relay
//!
//! # Serve the bundled web client alongside the relay
//! droplink-relay --port 3001 --static-dir dist
//! ```

#![allow(clippy::doc_markdown)]

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use droplink_core::config::Config;

mod server;

/// Pairing and signaling relay for Droplink.
#[derive(Debug, Parser)]
#[command(name = "droplink-relay", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "DROPLINK_PORT")]
    port: Option<u16>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of static web client files to serve
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Seconds a pairing code stays valid
    #[arg(long)]
    code_ttl_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(dir) = cli.static_dir {
        config.network.static_dir = Some(dir);
    }
    if let Some(ttl) = cli.code_ttl_secs {
        config.pairing.code_ttl_secs = ttl;
    }

    server::run(config).await
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,droplink_relay=info,droplink_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
