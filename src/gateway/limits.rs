use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{Clock, GatewayError, SystemClock};

pub const FALLBACK_IDENTIFIER: &str = "0.0.0.0";

/// Default bound on distinct callers tracked per window by the memory store.
pub const DEFAULT_MAX_TRACKED_IDENTIFIERS: usize = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_seconds: 24 * 60 * 60,
        }
    }
}

impl LimitsConfig {
    /// Index of the fixed window containing `now`.
    pub fn window_index(&self, now_epoch_seconds: u64) -> u64 {
        now_epoch_seconds / self.window_seconds.max(1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub admitted: bool,
    pub remaining: u32,
}

impl RateLimitDecision {
    pub(crate) fn from_count(count: u64, limits: &LimitsConfig) -> Self {
        let max = u64::from(limits.max_requests);
        Self {
            admitted: count <= max,
            remaining: u32::try_from(max.saturating_sub(count)).unwrap_or(u32::MAX),
        }
    }
}

/// Backing store for per-caller request counters.
///
/// `check_and_increment` must count the request and decide admission as one
/// atomic step, so concurrent requests from the same caller cannot both take
/// the last slot.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn check_and_increment(
        &self,
        identifier: &str,
        limits: &LimitsConfig,
    ) -> Result<RateLimitDecision, GatewayError>;
}

#[derive(Debug, Clone)]
struct WindowUsage {
    window: u64,
    requests: u64,
}

#[derive(Debug, Default)]
struct MemoryUsage {
    usage: HashMap<String, WindowUsage>,
    last_gc_window: u64,
}

/// Fixed-window counters held in process memory.
///
/// At most `max_identifiers` callers are tracked per window. Once the table is
/// full, callers it has not seen yet are denied until the window rolls over.
pub struct MemoryRateLimitStore {
    state: Mutex<MemoryUsage>,
    clock: Box<dyn Clock>,
    max_identifiers: usize,
}

impl Default for MemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemClock))
    }

    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryUsage::default()),
            clock,
            max_identifiers: DEFAULT_MAX_TRACKED_IDENTIFIERS,
        }
    }

    pub fn with_max_identifiers(mut self, max_identifiers: usize) -> Self {
        self.max_identifiers = max_identifiers.max(1);
        self
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn check_and_increment(
        &self,
        identifier: &str,
        limits: &LimitsConfig,
    ) -> Result<RateLimitDecision, GatewayError> {
        let window = limits.window_index(self.clock.now_epoch_seconds());
        let mut state = self.state.lock().await;

        if window != state.last_gc_window {
            // Only the active window matters; older buckets are stale.
            state.usage.retain(|_, usage| usage.window == window);
            state.last_gc_window = window;
        }

        if !state.usage.contains_key(identifier) && state.usage.len() >= self.max_identifiers {
            tracing::warn!(
                identifier = %identifier,
                tracked = state.usage.len(),
                "rate-limit table full; denying untracked caller"
            );
            return Ok(RateLimitDecision {
                admitted: false,
                remaining: 0,
            });
        }

        let usage = state
            .usage
            .entry(identifier.to_string())
            .or_insert(WindowUsage {
                window,
                requests: 0,
            });
        if usage.window != window {
            usage.window = window;
            usage.requests = 0;
        }

        usage.requests = usage.requests.saturating_add(1);
        Ok(RateLimitDecision::from_count(usage.requests, limits))
    }
}

/// Optional request gate keyed by caller identifier.
#[derive(Clone, Default)]
pub struct RateLimiter {
    inner: Option<(Arc<dyn RateLimitStore>, LimitsConfig)>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limits", &self.inner.as_ref().map(|(_, limits)| limits))
            .finish()
    }
}

impl RateLimiter {
    /// A limiter that admits every request without touching any store.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn new(store: Arc<dyn RateLimitStore>, limits: LimitsConfig) -> Self {
        Self {
            inner: Some((store, limits)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn limits(&self) -> Option<&LimitsConfig> {
        self.inner.as_ref().map(|(_, limits)| limits)
    }

    pub async fn check(&self, identifier: &str) -> Result<RateLimitDecision, GatewayError> {
        let Some((store, limits)) = self.inner.as_ref() else {
            return Ok(RateLimitDecision {
                admitted: true,
                remaining: u32::MAX,
            });
        };
        store.check_and_increment(identifier, limits).await
    }
}

/// Caller identifier used as the rate-limit key: the first `x-forwarded-for`
/// entry, then `x-real-ip`, then [`FALLBACK_IDENTIFIER`].
pub fn client_identifier(headers: &HeaderMap) -> String {
    extract_header(headers, "x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| extract_header(headers, "x-real-ip"))
        .unwrap_or(FALLBACK_IDENTIFIER)
        .to_string()
}

fn extract_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
