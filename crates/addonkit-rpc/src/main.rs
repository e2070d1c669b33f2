//! Addonkit RPC Server - JSON-RPC backend for addon manager front-ends.
//!
//! This binary provides a JSON-RPC 2.0 server over HTTP that wraps the
//! addonkit-core library.

mod handlers;
mod server;
mod wrapper;

use anyhow::Result;
use clap::Parser;
use server::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "addonkit-rpc")]
#[command(about = "JSON-RPC server for Addonkit")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Configuration directory (defaults to ADDONKIT_CONFIG_DIR, then the
    /// platform config directory)
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Addonkit RPC Server");

    let mut builder = addonkit_core::AddonkitApi::builder().auto_create_dirs(true);
    if let Some(config_dir) = args.config_dir {
        builder = builder.config_dir(config_dir);
    }
    let api = builder.build().await?;

    let state = Arc::new(AppState { api });
    let addr = server::start_server(state.clone(), &args.host, args.port).await?;

    // Print port for the front-end to read (intentional stdout for IPC)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    state.api.shutdown().await;

    Ok(())
}
