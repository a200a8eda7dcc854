//! Hopper server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hopper_core::config::AppConfig;
use hopper_server::persist::LocalFilePersister;
use hopper_server::{AppState, create_router};
use hopper_storage::Spool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hopper - chunked upload reassembly server
#[derive(Parser, Debug)]
#[command(name = "hopperd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "HOPPER_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Startup banner
    tracing::info!("Hopper v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional; every setting has a default and
    // env vars can provide/override everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();

    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::info!(
            config_path = %args.config,
            "No config file found, using defaults and environment"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("HOPPER_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Register Prometheus metrics
    hopper_server::metrics::register_metrics();

    // Initialize the spool; creating its area directories doubles as a
    // writability check before accepting requests.
    let spool = Arc::new(
        Spool::new(&config.spool.path)
            .await
            .context("failed to initialize spool")?,
    );
    tracing::info!(path = %config.spool.path.display(), "Spool initialized");

    // Initialize metadata store
    let sessions = hopper_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    sessions
        .health_check()
        .await
        .context("metadata store health check failed")?;
    tracing::info!(path = %config.metadata.path.display(), "Metadata store initialized");

    // Initialize the persistence collaborator
    let persister = Arc::new(
        LocalFilePersister::new(config.persist.clone())
            .await
            .context("failed to initialize file persister")?,
    );
    tracing::info!(path = %config.persist.files_path.display(), "File persister initialized");

    // Create application state
    let state = AppState::new(config.clone(), spool, sessions, persister);

    // Spawn the background sweep if enabled
    if config.sweep.enabled {
        let interval = Duration::from_secs(config.sweep.interval_secs);
        let _sweep_handle = hopper_server::sweep::spawn_sweep(state.clone(), interval);
        tracing::info!(
            interval_secs = config.sweep.interval_secs,
            "Session sweep spawned"
        );
    } else {
        tracing::info!("Session sweep disabled");
    }

    // Create router
    let app = create_router(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    tracing::info!(
        max_chunk_size = config.server.max_chunk_size(),
        "Listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
