use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::types::StreamPayload;
use crate::utils::http::response_text_truncated;
use crate::{Result, TutorError};

pub const DEFAULT_API_BASE_URL: &str = "https://api.together.xyz/v1";
pub const DEFAULT_OBSERVABILITY_BASE_URL: &str = "https://together.helicone.ai/v1";
pub const DEFAULT_APP_NAME: &str = "llamatutor";

const OBSERVABILITY_AUTH_HEADER: &str = "helicone-auth";
const OBSERVABILITY_APP_NAME_HEADER: &str = "helicone-property-appname";
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Client for the hosted chat-completion API.
///
/// When an observability key is configured, requests are routed through the
/// observability proxy instead of the provider's API and tagged with the
/// application name.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    api_key: Option<String>,
    observability_key: Option<String>,
    api_base_url: String,
    observability_base_url: String,
    app_name: String,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "observability_key",
                &self.observability_key.as_ref().map(|_| "<redacted>"),
            )
            .field("endpoint", &self.endpoint())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl UpstreamClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            api_key: normalize_secret(api_key),
            observability_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            observability_base_url: DEFAULT_OBSERVABILITY_BASE_URL.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            request_timeout: None,
        })
    }

    pub fn with_observability_key(mut self, key: Option<String>) -> Self {
        self.observability_key = normalize_secret(key);
        self
    }

    pub fn with_api_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base_url = base_url.into();
        self
    }

    pub fn with_observability_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.observability_base_url = base_url.into();
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_request_timeout_seconds(mut self, timeout_seconds: Option<u64>) -> Self {
        self.request_timeout = timeout_seconds
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs);
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn has_observability_key(&self) -> bool {
        self.observability_key.is_some()
    }

    /// First eight characters of the primary key, for diagnostics.
    pub fn api_key_prefix(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(|key| format!("{}...", key.chars().take(8).collect::<String>()))
    }

    pub fn endpoint(&self) -> String {
        let base = if self.observability_key.is_some() {
            &self.observability_base_url
        } else {
            &self.api_base_url
        };
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    fn headers(&self, api_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, bearer(api_key)?);
        if let Some(key) = self.observability_key.as_deref() {
            headers.insert(OBSERVABILITY_AUTH_HEADER, bearer(key)?);
            let app_name = HeaderValue::from_str(&self.app_name).map_err(|_| {
                TutorError::Configuration(format!("invalid app name: {}", self.app_name))
            })?;
            headers.insert(OBSERVABILITY_APP_NAME_HEADER, app_name);
        }
        Ok(headers)
    }

    /// Sends one streaming chat-completion request and returns the successful
    /// response with its body still unread.
    pub async fn stream_chat(&self, payload: &StreamPayload) -> Result<reqwest::Response> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            TutorError::Configuration("missing chat-completion API key".to_string())
        })?;

        let body = serde_json::to_vec(payload).map_err(|err| {
            TutorError::InvalidResponse(format!("failed to encode request payload: {err}"))
        })?;

        let endpoint = self.endpoint();
        let mut request = self
            .http
            .post(&endpoint)
            .headers(self.headers(api_key)?)
            .body(body);
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        tracing::debug!(
            endpoint = %endpoint,
            model = payload.model(),
            messages = payload.messages().len(),
            "sending chat completion request"
        );
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response_text_truncated(response, MAX_ERROR_BODY_BYTES).await;
        tracing::warn!(status = status.as_u16(), body = %body, "upstream returned non-success status");
        Err(TutorError::from_status(status, body))
    }
}

fn normalize_secret(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn bearer(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| TutorError::Configuration("credential is not a valid header".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}
