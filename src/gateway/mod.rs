//! HTTP gateway (feature-gated).

pub mod config;
pub mod http;
pub mod limits;
#[cfg(feature = "gateway-store-redis")]
pub mod redis_store;

use thiserror::Error;

use crate::TutorError;

pub use config::{GatewayConfig, RateLimitConfig};
pub use http::GatewayHttpState;
pub use limits::{
    LimitsConfig, MemoryRateLimitStore, RateLimitDecision, RateLimitStore, RateLimiter,
    client_identifier,
};
#[cfg(feature = "gateway-store-redis")]
pub use redis_store::{RedisRateLimitStore, RedisStoreError};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
    #[error("rate limit exceeded for {identifier}")]
    RateLimited {
        identifier: String,
        window_seconds: u64,
    },
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
    #[error("rate limit store error: {message}")]
    Store { message: String },
    #[error(transparent)]
    Upstream(#[from] TutorError),
}

pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        now.as_secs()
    }
}
