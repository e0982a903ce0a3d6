use anyhow::Result;
use cachegate_server::{
    AppState, CacheStorage, HttpFetcher, ServerConfig, SnapshotManager, WorkerRegistry,
    create_router, init_metrics,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cachegate-server")]
#[command(version, about = "Caching reverse proxy with per-route strategies")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the upstream origin
    #[arg(long)]
    origin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        ServerConfig::from_file(&args.config)?
    } else {
        ServerConfig::default()
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(origin) = args.origin {
        config.upstream.origin = origin;
    }
    config.validate()?;

    init_tracing(&config);

    info!("Starting Cachegate Server v{}", env!("CARGO_PKG_VERSION"));
    if !args.config.exists() {
        warn!("Config file {:?} not found, using defaults", args.config);
    }

    init_metrics();

    let origin = config.origin_url()?;
    let fetcher = Arc::new(HttpFetcher::new(config.upstream_timeout())?);

    // Restore the cache store
    let snapshot = config
        .persistence
        .enabled
        .then(|| Arc::new(SnapshotManager::new(config.persistence.clone())));
    let storage = match snapshot {
        Some(ref manager) => manager.load_or_empty().await,
        None => CacheStorage::new(),
    };

    let registry = Arc::new(WorkerRegistry::new(origin.clone(), storage, fetcher));

    // Install the configured version; requests pass through until one is active
    if let Err(e) = registry.register(config.cache.clone()).await {
        error!("Install failed, serving in passthrough mode: {}", e);
    }

    if let Some(ref manager) = snapshot {
        if let Err(e) = manager.save(registry.storage()).await {
            error!("Failed to write snapshot: {}", e);
        }
    }

    let state = AppState {
        registry: registry.clone(),
        cache_config: Arc::new(config.cache.clone()),
        snapshot: snapshot.clone(),
    };
    let app = create_router(state);

    let addr = config.server_addr();
    info!("Proxying {} on http://{}", origin, addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(ref manager) = snapshot {
        info!("Writing final snapshot...");
        if let Err(e) = manager.save(registry.storage()).await {
            error!("Failed to write snapshot: {}", e);
        }
    }

    info!("Cachegate Server stopped");
    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "pretty" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .pretty()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
