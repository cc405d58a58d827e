//! Tubecache server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tubecache_core::config::AppConfig;
use tubecache_server::bootstrap::ensure_bootstrap_key;
use tubecache_server::extractor::HttpExtractor;
use tubecache_server::{AppState, Resolver, create_router};

/// Tubecache - a caching media extraction proxy
#[derive(Parser, Debug)]
#[command(name = "tubecached")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TUBECACHE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Tubecache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    // TUBECACHE_CONFIG is just the file path, not configuration itself
    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with("TUBECACHE_") && key != "TUBECACHE_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: tubecached --config /path/to/config.toml\n  \
             2. Environment variables: TUBECACHE_SERVER__BIND=0.0.0.0:8080 \
             TUBECACHE_ADMIN__BOOTSTRAP_KEY=YOUR_KEY_HERE \
             TUBECACHE_UPSTREAM__BASE_URL=https://extractor.example.com tubecached\n\n\
             Set TUBECACHE_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("TUBECACHE_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    if let Err(e) = config.validate() {
        anyhow::bail!("invalid configuration: {e}");
    }

    // Initialize storage backend
    let storage = tubecache_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!("Storage backend initialized");

    // Verify storage connectivity before accepting requests
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    // Initialize metadata store
    let metadata = tubecache_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    // Install the bootstrap admin key
    ensure_bootstrap_key(metadata.as_ref(), &config.admin).await?;

    // Build the resolver against the configured upstream
    let extractor = Arc::new(HttpExtractor::new(&config.upstream)?);
    let resolver = Arc::new(Resolver::new(
        metadata.clone(),
        storage.clone(),
        extractor,
        &config.cache,
        config.upstream.max_retries,
    ));

    let state = AppState::new(config.clone(), storage, metadata, resolver);
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    // Start server with ConnectInfo for client IP extraction
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
