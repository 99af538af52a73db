//! foundry-pipeline - Flask production pipeline service
//!
//! Serves stage posts, queues, scrap administration and the live event
//! stream over HTTP, and runs the auto-quench sweeper in the background.

use anyhow::{Context, Result};
use clap::Parser;
use foundry_common::db::init_database;
use foundry_common::EventHub;
use foundry_pipeline::config::Config;
use foundry_pipeline::services::AutoQuench;
use foundry_pipeline::{build_router, AppState, EngineSettings, PipelineEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for foundry-pipeline
#[derive(Parser, Debug)]
#[command(name = "foundry-pipeline")]
#[command(about = "Flask production pipeline service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "FOUNDRY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, env = "FOUNDRY_DATABASE")]
    database: Option<PathBuf>,

    /// Address to listen on (host:port)
    #[arg(short, long, env = "FOUNDRY_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::resolve(args.config.as_deref(), args.database.as_deref(), args.bind.as_deref())
        .context("Failed to resolve configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.settings.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting foundry-pipeline");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config.config_file {
        info!("Config file: {}", path.display());
    }
    info!("Database: {}", config.database_path.display());

    let pool = init_database(&config.database_path, &config.settings.database)
        .await
        .context("Failed to initialize database")?;

    let hub = EventHub::new(
        config.settings.events.dispatch_capacity,
        config.settings.events.subscriber_buffer,
    );

    let engine = Arc::new(PipelineEngine::new(
        pool,
        hub,
        EngineSettings::from_config(&config.settings),
    ));

    if config.settings.auto_quench.enabled {
        AutoQuench::new(Arc::clone(&engine), &config.settings.auto_quench).spawn();
    } else {
        info!("Auto-quench sweeper disabled");
    }

    let app = build_router(AppState::new(engine));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);
    info!("Health check: http://{}/health", config.bind_addr);

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
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
