//! Issues a series of decisions against one strategy and prints the outcomes.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use throttle::ratelimit::{AdmissionStrategy, StrategyFactory, StrategyParams};
use throttle::store::{MemoryStore, RedisStore, SharedStoreHandle};

/// Drive a rate limiting strategy with test traffic.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Algorithm to exercise (fixed, leaky, token, distributed)
    #[arg(short, long, default_value = "token")]
    algorithm: String,

    /// Number of decisions to issue
    #[arg(short = 'n', long, default_value_t = 8)]
    requests: u32,

    /// Pause between sequential decisions, in milliseconds
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,

    /// Issue all decisions at once instead of sequentially
    #[arg(long)]
    concurrent: bool,

    /// Bucket capacity or window limit
    #[arg(long, default_value_t = 5.0)]
    capacity: f64,

    /// Refill or leak rate per second
    #[arg(long, default_value_t = 1.0)]
    rate: f64,

    /// Client key the decisions are made for
    #[arg(long, default_value = "demo")]
    client: String,

    /// Redis URL for the distributed algorithm (in-process store otherwise)
    #[arg(long)]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let store: SharedStoreHandle = match &args.redis_url {
        Some(url) => Arc::new(RedisStore::connect(url).await?),
        None => Arc::new(MemoryStore::new()),
    };

    let factory = StrategyFactory::new()
        .with_defaults(StrategyParams {
            capacity: args.capacity,
            rate: args.rate,
            ..StrategyParams::default()
        })
        .with_store(store, Duration::from_millis(500));

    let strategy = factory.create(&args.algorithm)?;
    info!(
        algorithm = strategy.name(),
        requests = args.requests,
        concurrent = args.concurrent,
        "Issuing decisions"
    );

    if args.concurrent {
        let decisions = (1..=args.requests).map(|i| {
            let strategy = strategy.clone();
            let client = args.client.clone();
            async move { report(i, strategy.as_ref(), &client).await }
        });
        futures::future::join_all(decisions).await;
    } else {
        for i in 1..=args.requests {
            report(i, strategy.as_ref(), &args.client).await;
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }

    Ok(())
}

async fn report(i: u32, strategy: &dyn AdmissionStrategy, client: &str) {
    let at = chrono::Local::now().format("%S%.3f");
    match strategy.allow(client).await {
        Ok(true) => println!("Request {} at time {}, Allowed", i, at),
        Ok(false) => println!("Request {} at time {}, Denied", i, at),
        Err(e) => error!(request = i, error = %e, "Decision failed"),
    }
}
