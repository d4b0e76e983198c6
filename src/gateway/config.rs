use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::GatewayError;
use super::limits::{
    DEFAULT_MAX_TRACKED_IDENTIFIERS, LimitsConfig, MemoryRateLimitStore, RateLimiter,
};
use crate::stream::DEFAULT_LEADING_NEWLINE_EVENTS;
use crate::types::DEFAULT_MODEL;
use crate::upstream::{
    DEFAULT_API_BASE_URL, DEFAULT_APP_NAME, DEFAULT_OBSERVABILITY_BASE_URL, UpstreamClient,
};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen: String,
    pub api_key: Option<String>,
    pub observability_key: Option<String>,
    pub api_base_url: String,
    pub observability_base_url: String,
    pub app_name: String,
    pub model: String,
    pub upstream_timeout_secs: Option<u64>,
    pub leading_newline_events: usize,
    pub rate_limit: RateLimitConfig,
    pub debug_endpoints: bool,
    pub json_logs: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            api_key: None,
            observability_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            observability_base_url: DEFAULT_OBSERVABILITY_BASE_URL.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            model: DEFAULT_MODEL.to_string(),
            upstream_timeout_secs: None,
            leading_newline_events: DEFAULT_LEADING_NEWLINE_EVENTS,
            rate_limit: RateLimitConfig::default(),
            debug_endpoints: false,
            json_logs: false,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("listen", &self.listen)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "observability_key",
                &self.observability_key.as_ref().map(|_| "<redacted>"),
            )
            .field("api_base_url", &self.api_base_url)
            .field("observability_base_url", &self.observability_base_url)
            .field("app_name", &self.app_name)
            .field("model", &self.model)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .field("leading_newline_events", &self.leading_newline_events)
            .field("rate_limit", &self.rate_limit)
            .field("debug_endpoints", &self.debug_endpoints)
            .field("json_logs", &self.json_logs)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub redis_url: Option<String>,
    pub redis_prefix: Option<String>,
    pub in_memory: bool,
    pub max_requests: u32,
    pub window_seconds: u64,
    pub max_tracked_identifiers: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let limits = LimitsConfig::default();
        Self {
            redis_url: None,
            redis_prefix: None,
            in_memory: false,
            max_requests: limits.max_requests,
            window_seconds: limits.window_seconds,
            max_tracked_identifiers: DEFAULT_MAX_TRACKED_IDENTIFIERS,
        }
    }
}

impl std::fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<redacted>"))
            .field("redis_prefix", &self.redis_prefix)
            .field("in_memory", &self.in_memory)
            .field("max_requests", &self.max_requests)
            .field("window_seconds", &self.window_seconds)
            .field("max_tracked_identifiers", &self.max_tracked_identifiers)
            .finish()
    }
}

impl RateLimitConfig {
    pub fn limits(&self) -> LimitsConfig {
        LimitsConfig {
            max_requests: self.max_requests,
            window_seconds: self.window_seconds.max(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.in_memory || self.redis_url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }
}

impl GatewayConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, GatewayError> {
        toml::from_str(raw).map_err(|err| GatewayError::Configuration {
            reason: format!("invalid config file: {err}"),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| GatewayError::Configuration {
            reason: format!("failed to read {}: {err}", path.display()),
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn upstream_client(&self) -> Result<UpstreamClient, GatewayError> {
        Ok(UpstreamClient::new(self.api_key.clone())?
            .with_observability_key(self.observability_key.clone())
            .with_api_base_url(self.api_base_url.clone())
            .with_observability_base_url(self.observability_base_url.clone())
            .with_app_name(self.app_name.clone())
            .with_request_timeout_seconds(self.upstream_timeout_secs))
    }

    /// Builds the rate limiter once at startup. Redis takes precedence over
    /// the in-memory store; with neither configured the limiter is disabled.
    pub async fn rate_limiter(&self) -> Result<RateLimiter, GatewayError> {
        let config = &self.rate_limit;
        let limits = config.limits();

        if let Some(url) = config
            .redis_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
        {
            return redis_rate_limiter(url, config.redis_prefix.as_deref(), limits).await;
        }

        if config.in_memory {
            return Ok(RateLimiter::new(
                Arc::new(
                    MemoryRateLimitStore::new().with_max_identifiers(config.max_tracked_identifiers),
                ),
                limits,
            ));
        }

        Ok(RateLimiter::disabled())
    }
}

#[cfg(feature = "gateway-store-redis")]
async fn redis_rate_limiter(
    url: &str,
    prefix: Option<&str>,
    limits: LimitsConfig,
) -> Result<RateLimiter, GatewayError> {
    let mut store = super::RedisRateLimitStore::new(url)?;
    if let Some(prefix) = prefix {
        store = store.with_prefix(prefix);
    }
    store.ping().await?;
    Ok(RateLimiter::new(Arc::new(store), limits))
}

#[cfg(not(feature = "gateway-store-redis"))]
async fn redis_rate_limiter(
    _url: &str,
    _prefix: Option<&str>,
    _limits: LimitsConfig,
) -> Result<RateLimiter, GatewayError> {
    Err(GatewayError::Configuration {
        reason: "redis rate limiting requires `--features gateway-store-redis`".to_string(),
    })
}
