//! NetChat Daemon - concurrent chat server with an analytics bot
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (port 12345)
//! netchatd
//!
//! # Start with a config file and a port override
//! netchatd --config netchat.toml --port 7000
//!
//! # Enable debug logging
//! RUST_LOG=netchatd=debug netchatd
//! ```
//!
//! # Signal Handling
//!
//! SIGTERM/SIGINT trigger a graceful shutdown: the accept loop stops, the
//! broker drains within its grace period, and all connections are closed.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use netchatd::broker::Broker;
use netchatd::commands::CommandDispatcher;
use netchatd::config::ServerConfig;
use netchatd::monitor::spawn_monitor_task;
use netchatd::registry::spawn_registry;
use netchatd::server::ChatServer;
use netchatd::stats::StatsAggregator;

/// NetChat daemon - chat server with statistics bot
#[derive(Parser, Debug)]
#[command(name = "netchatd", version, about)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    run_daemon()
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("netchatd=info".parse()?)
                .add_directive("netchat_core=info".parse()?)
                .add_directive("netchat_protocol=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    let config = Arc::new(config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        port = config.port,
        "NetChat daemon starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "error waiting for shutdown signal");
        }
        info!("shutdown signal received");
        shutdown_token.cancel();
    });

    // Spawn the session registry
    let registry = spawn_registry(config.max_sessions, config.rate_limit, config.rate_window());
    info!("session registry started");

    // Statistics aggregator and command dispatcher feed the analytics path
    let stats = Arc::new(StatsAggregator::new());
    let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&stats)));

    // Start the routing pipeline
    let broker = Broker::start(&config, registry.clone(), stats, dispatcher, &cancel);

    // Spawn the resource monitor
    let _monitor_handle = spawn_monitor_task(broker.handle(), cancel.clone());
    info!("resource monitor started");

    // Bind and run the server
    let server = ChatServer::bind(
        Arc::clone(&config),
        registry,
        broker.handle(),
        cancel.clone(),
    )
    .await
    .context("Failed to bind listen socket")?;

    if let Err(e) = server.run().await {
        error!(error = %e, "server error");
        broker.shutdown().await;
        return Err(e.into());
    }

    // Accept loop has exited; drain and stop the pipeline
    broker.shutdown().await;

    info!("NetChat daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
