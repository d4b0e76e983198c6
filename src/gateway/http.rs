use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use super::{GatewayError, RateLimiter, client_identifier};
use crate::TutorError;
use crate::prompt::{WebSource, build_system_prompt, clean_text};
use crate::stream::{DEFAULT_LEADING_NEWLINE_EVENTS, TokenExtractor, normalize_stream};
use crate::types::{ChatMessage, DEFAULT_MODEL, StreamPayload};
use crate::upstream::UpstreamClient;
use crate::utils::sse::{SseLimits, sse_event_stream_from_response};

use super::config::GatewayConfig;

const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";
const REQUEST_ID_HEADER: &str = "x-request-id";

static REQUEST_ID_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Debug)]
pub struct GatewayHttpState {
    upstream: UpstreamClient,
    limiter: RateLimiter,
    model: String,
    leading_newline_events: usize,
    sse_limits: SseLimits,
    debug_endpoints: bool,
}

impl GatewayHttpState {
    pub fn new(upstream: UpstreamClient) -> Self {
        Self {
            upstream,
            limiter: RateLimiter::disabled(),
            model: DEFAULT_MODEL.to_string(),
            leading_newline_events: DEFAULT_LEADING_NEWLINE_EVENTS,
            sse_limits: SseLimits::default(),
            debug_endpoints: false,
        }
    }

    /// Wires a state from loaded configuration and an already-built limiter.
    pub fn from_config(config: &GatewayConfig, limiter: RateLimiter) -> Result<Self, GatewayError> {
        Ok(Self::new(config.upstream_client()?)
            .with_rate_limiter(limiter)
            .with_model(config.model.clone())
            .with_leading_newline_events(config.leading_newline_events)
            .with_debug_endpoints(config.debug_endpoints))
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_leading_newline_events(mut self, count: usize) -> Self {
        self.leading_newline_events = count;
        self
    }

    pub fn with_sse_limits(mut self, limits: SseLimits) -> Self {
        self.sse_limits = limits;
        self
    }

    pub fn with_debug_endpoints(mut self, enabled: bool) -> Self {
        self.debug_endpoints = enabled;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SystemPromptRequest {
    #[serde(default)]
    sources: Vec<WebSource>,
    age_group: String,
}

#[derive(Debug, Serialize)]
struct SystemPromptResponse {
    prompt: String,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct DebugConfigResponse {
    api_key_set: bool,
    api_key_prefix: Option<String>,
    observability_key_set: bool,
    endpoint: String,
    model: String,
    rate_limit: Option<DebugRateLimit>,
}

#[derive(Debug, Serialize)]
struct DebugRateLimit {
    max_requests: u32,
    window_seconds: u64,
}

pub fn router(state: GatewayHttpState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/getChat", post(handle_chat))
        .route("/v1/chat", post(handle_chat))
        .route("/api/getSystemPrompt", post(handle_system_prompt));

    if state.debug_endpoints {
        router = router.route("/debug/config", get(debug_config));
    }

    router.with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn handle_chat(
    State(state): State<GatewayHttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let request_id = extract_header(&headers, REQUEST_ID_HEADER).unwrap_or_else(generate_request_id);
    let span = tracing::info_span!("chat", request_id = %request_id);

    async move {
        match stream_chat(&state, &headers, &body, &request_id).await {
            Ok(response) => Ok(response),
            Err(err) => {
                log_gateway_error(&err);
                Err(map_gateway_error(&err))
            }
        }
    }
    .instrument(span)
    .await
}

async fn stream_chat(
    state: &GatewayHttpState,
    headers: &HeaderMap,
    body: &[u8],
    request_id: &str,
) -> Result<Response, GatewayError> {
    let request: ChatRequest =
        serde_json::from_slice(body).map_err(|err| GatewayError::InvalidRequest {
            reason: format!("expected a JSON object with a `messages` array: {err}"),
        })?;

    if !state.upstream.has_api_key() {
        return Err(GatewayError::Configuration {
            reason: "missing chat-completion API key".to_string(),
        });
    }

    if let Some(limits) = state.limiter.limits().copied() {
        let identifier = client_identifier(headers);
        let decision = state.limiter.check(&identifier).await?;
        if !decision.admitted {
            return Err(GatewayError::RateLimited {
                identifier,
                window_seconds: limits.window_seconds,
            });
        }
        tracing::debug!(identifier = %identifier, remaining = decision.remaining, "request admitted");
    }

    tracing::info!(
        model = %state.model,
        messages = request.messages.len(),
        "forwarding chat request"
    );
    let payload = StreamPayload::new(state.model.clone(), request.messages);
    let upstream = state.upstream.stream_chat(&payload).await?;

    let events = sse_event_stream_from_response(upstream, state.sse_limits);
    let extractor = TokenExtractor::with_leading_newline_events(state.leading_newline_events);
    let stream_request_id = request_id.to_string();
    let frames = normalize_stream(events, extractor).map(move |item| {
        item.map_err(|err| {
            tracing::error!(request_id = %stream_request_id, error = %err, "response stream aborted");
            std::io::Error::other(err.to_string())
        })
    });

    let mut response = Response::new(Body::from_stream(frames));
    let response_headers = response.headers_mut();
    response_headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE),
    );
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    insert_request_id(response_headers, request_id);
    Ok(response)
}

async fn handle_system_prompt(
    body: Bytes,
) -> Result<Json<SystemPromptResponse>, (StatusCode, Json<ErrorResponse>)> {
    let request: SystemPromptRequest = serde_json::from_slice(&body).map_err(|err| {
        let err = GatewayError::InvalidRequest {
            reason: format!("expected a JSON object with an `ageGroup` string: {err}"),
        };
        log_gateway_error(&err);
        map_gateway_error(&err)
    })?;

    let sources: Vec<WebSource> = request
        .sources
        .into_iter()
        .map(|source| WebSource {
            full_content: clean_text(&source.full_content),
            ..source
        })
        .collect();
    Ok(Json(SystemPromptResponse {
        prompt: build_system_prompt(&sources, &request.age_group),
    }))
}

async fn debug_config(State(state): State<GatewayHttpState>) -> Json<DebugConfigResponse> {
    Json(DebugConfigResponse {
        api_key_set: state.upstream.has_api_key(),
        api_key_prefix: state.upstream.api_key_prefix(),
        observability_key_set: state.upstream.has_observability_key(),
        endpoint: state.upstream.endpoint(),
        model: state.model.clone(),
        rate_limit: state.limiter.limits().map(|limits| DebugRateLimit {
            max_requests: limits.max_requests,
            window_seconds: limits.window_seconds,
        }),
    })
}

fn log_gateway_error(err: &GatewayError) {
    match err {
        GatewayError::InvalidRequest { reason } => {
            tracing::info!(reason = %reason, "rejected malformed request body");
        }
        GatewayError::RateLimited { identifier, .. } => {
            tracing::warn!(identifier = %identifier, "caller exceeded request quota");
        }
        other => tracing::error!(error = %other, "chat request failed"),
    }
}

fn map_gateway_error(err: &GatewayError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        GatewayError::Configuration { .. } => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "configuration_error",
            "Server configuration error: Missing API key",
        ),
        GatewayError::Upstream(TutorError::Configuration(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "configuration_error",
            "Server configuration error: Invalid API configuration",
        ),
        // Parser detail stays in the log.
        GatewayError::InvalidRequest { .. } => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "invalid_request",
            "Error processing request. Please try again.",
        ),
        GatewayError::RateLimited { window_seconds, .. } => error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            format!(
                "No requests left. Try again in {}.",
                describe_window(*window_seconds)
            ),
        ),
        GatewayError::Upstream(TutorError::Authentication { .. }) => error_response(
            StatusCode::UNAUTHORIZED,
            "upstream_unauthorized",
            "Authentication error: Please check API configuration",
        ),
        GatewayError::Upstream(TutorError::RateLimited { .. }) => error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "upstream_rate_limited",
            "Rate limit exceeded. Please try again later.",
        ),
        GatewayError::Store { .. } | GatewayError::Upstream(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Error processing request. Please try again.",
        ),
    }
}

fn error_response(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code,
                message: message.into(),
            },
        }),
    )
}

fn describe_window(window_seconds: u64) -> String {
    match window_seconds {
        secs if secs >= 3600 && secs % 3600 == 0 => format!("{}h", secs / 3600),
        secs if secs >= 60 && secs % 60 == 0 => format!("{}m", secs / 60),
        secs => format!("{secs}s"),
    }
}

fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn generate_request_id() -> String {
    let seq = REQUEST_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    let ts_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    format!("tutor-{ts_ms}-{seq}")
}

fn insert_request_id(headers: &mut HeaderMap, request_id: &str) {
    let value = match HeaderValue::from_str(request_id) {
        Ok(value) => value,
        Err(_) => return,
    };
    headers.insert(REQUEST_ID_HEADER, value);
}
