//! pgw-server: Portal gateway.
//!
//! Authenticates against a remote administrative portal, caches the
//! authenticated session under a locally issued session key, and relays
//! follow-up calls (tenant listing, arbitrary proxying) for callers
//! presenting that key. Sessions are snapshotted to disk and survive
//! restarts.

mod api;
mod config;
mod mcp;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use api::AppState;
use config::GatewayConfig;
use store::SessionStore;

/// pgw-server — portal gateway
#[derive(Parser, Debug)]
#[command(name = "pgw-server", version, about = "Portal gateway server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.pgw/config.toml")]
    config: String,

    /// Shared-secret API token (overrides config file and PGW_API_TOKEN)
    #[arg(long)]
    api_token: Option<String>,

    /// Session snapshot file
    #[arg(long)]
    session_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = PathBuf::from(&cli.config);
    let config = match GatewayConfig::load(
        Some(&config_path),
        cli.port,
        cli.api_token.as_deref(),
        cli.session_file.as_deref(),
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        "starting pgw-server"
    );
    if config.api_token.is_none() {
        warn!("no API token configured, all authenticated calls will be rejected");
    }

    let store = Arc::new(SessionStore::load(config.session_file.clone()));
    let state = AppState {
        config: Arc::new(config),
        store: store.clone(),
    };

    // Periodic snapshot, independent of the per-mutation writes.
    let snapshot_task = {
        let store = store.clone();
        let interval = state.config.snapshot_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                store.save().await;
            }
        })
    };

    let addr = format!("{}:{}", state.config.bind, state.config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(%addr, "gateway listening");

    let app = api::router(state);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    // Final flush: the one ordering guarantee tied to process lifetime.
    // Stop the ticker first so it cannot write alongside the flush.
    snapshot_task.abort();
    store.save().await;
    info!("pgw-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
