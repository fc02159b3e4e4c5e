//! Runs against a live Redis when `REDIS_URL` is set; skipped otherwise.
//!
//! ```text
//! docker run --rm -p 6379:6379 redis:7
//! REDIS_URL=redis://127.0.0.1:6379 cargo test --test itest_redis_token_bucket
//! ```
//!
//! The Lua script and `MemoryStore` implement the same arithmetic separately;
//! `script_matches_memory_store` keeps them in step.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use throttle::ratelimit::{AdmissionStrategy, DistributedTokenBucket};
use throttle::store::{MemoryStore, RedisStore, SharedStore, SharedStoreHandle};
use tokio_test::assert_ok;

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_prefix() -> String {
    format!(
        "throttle_test_{}_{}",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

async fn store(url: &str) -> SharedStoreHandle {
    Arc::new(
        RedisStore::connect(url)
            .await
            .unwrap()
            .with_key_ttl(Duration::from_secs(60)),
    )
}

#[tokio::test]
async fn admits_capacity_then_denies() {
    let Some(url) = redis_url() else {
        return;
    };

    let bucket = DistributedTokenBucket::new(store(&url).await, 3.0, 0.001)
        .unwrap()
        .with_key_prefix(unique_prefix())
        .with_timeout(Duration::from_secs(2));

    for _ in 0..3 {
        assert!(assert_ok!(bucket.allow("10.0.0.1").await));
    }
    assert!(!assert_ok!(bucket.allow("10.0.0.1").await));
}

#[tokio::test]
async fn reply_carries_diagnostics() {
    let Some(url) = redis_url() else {
        return;
    };

    let store = store(&url).await;
    let bucket = DistributedTokenBucket::new(store.clone(), 2.0, 1.0)
        .unwrap()
        .with_key_prefix(unique_prefix());
    let keys = bucket.keys_for("client");

    let first = assert_ok!(store.evaluate(&keys, 1_000, 1.0, 2.0).await);
    assert_eq!(first.tokens, 2.0);
    assert_eq!(first.elapsed, 0.0);

    let second = assert_ok!(store.evaluate(&keys, 1_500, 1.0, 2.0).await);
    assert_eq!(second.elapsed, 0.5);
    assert_eq!(second.added, 0.5);
    assert_eq!(second.tokens, 1.5);
    assert!(second.admitted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_token() {
    let Some(url) = redis_url() else {
        return;
    };

    let store = store(&url).await;
    let prefix = unique_prefix();

    // Separate bucket instances stand in for separate server processes
    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let bucket = DistributedTokenBucket::new(store.clone(), 1.0, 0.0001)
                .unwrap()
                .with_key_prefix(prefix.clone())
                .with_timeout(Duration::from_secs(2));
            tokio::spawn(async move { bucket.allow("shared").await.unwrap() })
        })
        .collect();

    let admitted = futures::future::join_all(tasks)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count();

    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn script_matches_memory_store() {
    let Some(url) = redis_url() else {
        return;
    };

    let redis = store(&url).await;
    let memory = MemoryStore::new();
    let keys = throttle::store::BucketKeys::for_client(&unique_prefix(), "client");

    // Bursts, idle gaps, a refill past capacity and a lagging clock
    let steps = [1_000, 1_000, 1_000, 1_250, 1_250, 4_000, 3_500, 3_500, 3_600, 10_000];
    for now_ms in steps {
        let from_script = assert_ok!(redis.evaluate(&keys, now_ms, 2.0, 3.0).await);
        let from_memory = assert_ok!(memory.evaluate(&keys, now_ms, 2.0, 3.0).await);
        assert_eq!(from_script, from_memory, "diverged at now_ms={}", now_ms);
    }
}
