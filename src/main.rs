use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use throttle::config::ThrottleConfig;
use throttle::http::{HttpServer, RateLimitGate};
use throttle::ratelimit::{Algorithm, ClientLimits, StrategyFactory};
use throttle::store::{MemoryStore, RedisStore, SharedStoreHandle};

/// Per-client request throttling service.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the service configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting Throttle Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ThrottleConfig::load(args.config.as_deref())?;
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let algorithm: Algorithm = config.rate_limiting.algorithm.parse()?;
    let limits = Arc::new(ClientLimits::from_file(
        &config.rate_limiting.client_limits_path,
    )?);
    info!(clients = limits.len(), "Client rate limits loaded");

    // One store handle for the whole process, shared by every bucket
    let store: SharedStoreHandle = match &config.store.redis_url {
        Some(url) => Arc::new(
            RedisStore::connect(url)
                .await?
                .with_key_ttl(std::time::Duration::from_millis(config.store.key_ttl_ms)),
        ),
        None => {
            warn!("No Redis URL configured; shared buckets are local to this instance");
            Arc::new(MemoryStore::new())
        }
    };

    let factory = StrategyFactory::new()
        .with_store(store, config.rate_limiting.store_timeout())
        .with_key_prefix(config.store.key_prefix.clone());

    let gate = Arc::new(RateLimitGate::new(
        limits,
        factory,
        algorithm,
        config.rate_limiting.fixed_window(),
    )?);
    info!(algorithm = %algorithm, "Rate limiter initialized");

    HttpServer::new(config.server.http_addr, gate)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Throttle Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
