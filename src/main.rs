// src/main.rs

//! The main entry point for the stream-cluster coordinator binary.

use anyhow::Result;
use streamcoord::config::CoordinatorConfig;
use streamcoord::core::collaborators::demo::{InMemoryLogEngine, InMemoryRegistry, SingleNodeMembership};
use streamcoord::runtime::{self, Collaborators};
use std::env;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("coordinator version {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config = match config_path {
        Some(path) => match CoordinatorConfig::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from \"{path}\": {e}");
                std::process::exit(1);
            }
        },
        None => CoordinatorConfig::default_config()?,
    };

    // Setup logging with reloading capabilities, matching the server's
    // dynamic log-level convention.
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();
    let _reload_handle = Arc::new(reload_handle);

    info!(bind_address = %config.bind_address, "starting coordinator");

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let local_node = config.bind_address.to_string();

    let collaborators = Collaborators {
        log_engine: Arc::new(InMemoryLogEngine::default()),
        registry: Arc::new(InMemoryRegistry::default()),
        membership: Arc::new(SingleNodeMembership::new(local_node)),
    };

    let client = match runtime::run(config, collaborators, shutdown_rx).await {
        Ok(client) => client,
        Err(e) => {
            error!("coordinator runtime failed to start: {}", e);
            return Err(e.into());
        }
    };
    let _ = client;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("failed to listen for shutdown signal: {}", e),
    }
    let _ = shutdown_tx.send(());

    Ok(())
}
