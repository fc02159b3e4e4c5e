//! Redis-backed shared store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script, Value};
use tracing::{debug, info};

use super::{BucketKeys, SharedStore, StoreEvaluation};
use crate::error::StoreError;

/// Refill-and-consume step, executed by Redis as one atomic unit.
///
/// Replies with `{available, elapsed_seconds, added}` as strings, since Redis
/// truncates Lua numbers to integers.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local tokens_key = KEYS[1]
local last_refill_key = KEYS[2]

local now_ms = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local ttl_ms = tonumber(ARGV[4])

local tokens = tonumber(redis.call("GET", tokens_key))
local last_refill = tonumber(redis.call("GET", last_refill_key))

if tokens == nil or last_refill == nil then
    tokens = capacity
    last_refill = now_ms
end

local elapsed = math.max(0, now_ms - last_refill) / 1000
local added = elapsed * refill_rate
local available = math.min(capacity, tokens + added)

tokens = available
if tokens >= 1 then
    tokens = tokens - 1
end

if now_ms > last_refill then
    last_refill = now_ms
end

if ttl_ms > 0 then
    redis.call("SET", tokens_key, tostring(tokens), "PX", ttl_ms)
    redis.call("SET", last_refill_key, tostring(last_refill), "PX", ttl_ms)
else
    redis.call("SET", tokens_key, tostring(tokens))
    redis.call("SET", last_refill_key, tostring(last_refill))
end

return {tostring(available), tostring(elapsed), tostring(added)}
"#;

/// A [`SharedStore`] evaluating buckets inside Redis.
///
/// Cloning is cheap: clones share the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    script: Script,
    key_ttl: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("script", &self.script.get_hash())
            .field("key_ttl", &self.key_ttl)
            .finish()
    }
}

impl RedisStore {
    /// Create a store over an existing connection manager.
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
            key_ttl: Duration::ZERO,
        }
    }

    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        info!(url = %url, "Connected to Redis");
        Ok(Self::new(connection))
    }

    /// Expire bucket keys after `ttl` without writes. Zero disables expiry.
    pub fn with_key_ttl(mut self, ttl: Duration) -> Self {
        self.key_ttl = ttl;
        self
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn evaluate(
        &self,
        keys: &BucketKeys,
        now_ms: i64,
        refill_rate: f64,
        capacity: f64,
    ) -> Result<StoreEvaluation, StoreError> {
        let mut connection = self.connection.clone();

        let reply: Value = self
            .script
            .key(&keys.tokens)
            .key(&keys.last_refill)
            .arg(now_ms)
            .arg(refill_rate)
            .arg(capacity)
            .arg(self.key_ttl.as_millis() as u64)
            .invoke_async(&mut connection)
            .await?;

        let evaluation = parse_reply(&reply)?;

        debug!(
            tokens = evaluation.tokens,
            elapsed = evaluation.elapsed,
            added = evaluation.added,
            tokens_key = %keys.tokens,
            "Evaluated token bucket script"
        );

        Ok(evaluation)
    }
}

/// Decode the script reply: an array of exactly three numbers.
pub(crate) fn parse_reply(reply: &Value) -> Result<StoreEvaluation, StoreError> {
    let items = match reply {
        Value::Array(items) => items,
        other => {
            return Err(StoreError::MalformedReply(format!(
                "expected an array, got {:?}",
                other
            )))
        }
    };

    if items.len() != 3 {
        return Err(StoreError::MalformedReply(format!(
            "expected 3 elements, got {}",
            items.len()
        )));
    }

    Ok(StoreEvaluation {
        tokens: parse_number(&items[0])?,
        elapsed: parse_number(&items[1])?,
        added: parse_number(&items[2])?,
    })
}

fn parse_number(value: &Value) -> Result<f64, StoreError> {
    let parsed = match value {
        Value::BulkString(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok()),
        Value::SimpleString(s) => s.trim().parse::<f64>().ok(),
        Value::Int(i) => Some(*i as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    };

    parsed
        .filter(|n| n.is_finite())
        .ok_or_else(|| StoreError::MalformedReply(format!("expected a number, got {:?}", value)))
}
