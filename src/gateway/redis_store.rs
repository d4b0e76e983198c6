use async_trait::async_trait;
use thiserror::Error;

use super::limits::{LimitsConfig, RateLimitDecision, RateLimitStore};
use super::{Clock, GatewayError, SystemClock};

pub const DEFAULT_PREFIX: &str = "llamatutor";

const FIXED_WINDOW_SCRIPT: &str = r#"
local count = redis.call("INCR", KEYS[1])
if count == 1 then
  redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return count
"#;

#[derive(Debug, Error)]
pub enum RedisStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl From<RedisStoreError> for GatewayError {
    fn from(err: RedisStoreError) -> Self {
        GatewayError::Store {
            message: err.to_string(),
        }
    }
}

/// Fixed-window counters kept in Redis, shared by every gateway instance
/// pointing at the same server and prefix.
pub struct RedisRateLimitStore {
    client: redis::Client,
    prefix: String,
    clock: Box<dyn Clock>,
}

impl std::fmt::Debug for RedisRateLimitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimitStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RedisRateLimitStore {
    pub fn new(url: impl AsRef<str>) -> Result<Self, RedisStoreError> {
        Ok(Self {
            client: redis::Client::open(url.as_ref())?,
            prefix: DEFAULT_PREFIX.to_string(),
            clock: Box::new(SystemClock),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    pub async fn ping(&self) -> Result<(), RedisStoreError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn key_window(&self, identifier: &str, window: u64) -> String {
        format!("{}:ratelimit:{identifier}:{window}", self.prefix)
    }

    async fn increment(&self, key: &str, ttl_ms: u64) -> Result<u64, RedisStoreError> {
        let mut conn = self.connection().await?;
        let count: u64 = redis::Script::new(FIXED_WINDOW_SCRIPT)
            .key(key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn check_and_increment(
        &self,
        identifier: &str,
        limits: &LimitsConfig,
    ) -> Result<RateLimitDecision, GatewayError> {
        let window = limits.window_index(self.clock.now_epoch_seconds());
        let key = self.key_window(identifier, window);
        let ttl_ms = limits.window_seconds.max(1).saturating_mul(1000);
        let count = self.increment(&key, ttl_ms).await?;
        Ok(RateLimitDecision::from_count(count, limits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_prefix_identifier_and_window() -> Result<(), RedisStoreError> {
        let store = RedisRateLimitStore::new("redis://127.0.0.1/")?;
        assert_eq!(store.prefix(), DEFAULT_PREFIX);

        let store = store.with_prefix("tutor-test");
        assert_eq!(store.prefix(), "tutor-test");
        assert_eq!(
            store.key_window("203.0.113.9", 20_000),
            "tutor-test:ratelimit:203.0.113.9:20000"
        );
        Ok(())
    }
}
