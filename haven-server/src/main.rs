//! haven-server - Main entry point
//!
//! Serves the subscription, session and billing API for Haven.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use haven_common::config::{prepare_root_folder, resolve_root_folder, ROOT_ENV_VAR, SETTINGS_FILE};
use haven_common::db::init_database;
use haven_common::SystemClock;
use haven_server::config::ServiceConfig;
use haven_server::{build_router, AppState};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for haven-server
#[derive(Parser, Debug)]
#[command(name = "haven-server")]
#[command(about = "Subscription, session and billing service for Haven")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the settings file)
    #[arg(short, long, env = "HAVEN_PORT")]
    port: Option<u16>,

    /// Root folder holding haven.db and haven.toml
    #[arg(short, long, env = ROOT_ENV_VAR)]
    root_folder: Option<String>,

    /// Conversational-video API key (overrides the settings file)
    #[arg(long, env = "HAVEN_VIDEO_API_KEY", hide_env_values = true)]
    video_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haven_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting Haven server (haven-server) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_ENV_VAR);
    let db_path = prepare_root_folder(&root_folder)
        .with_context(|| format!("Failed to prepare root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let mut config = ServiceConfig::load(&root_folder.join(SETTINGS_FILE))
        .context("Failed to load settings")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(key) = args.video_api_key {
        config.video.api_key = key;
    }
    if !config.video.has_usable_api_key() {
        warn!("Video API key missing or placeholder; sessions will use the fallback asset");
    }

    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Database ready: {}", db_path.display());

    let state = AppState::new(pool, &config, Arc::new(SystemClock));
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind_addr, config.server.port)
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("haven-server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
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
            Ok(mut sig) => {
                sig.recv().await;
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
