use thiserror::Error;

#[derive(Debug, Error)]
pub enum TutorError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream authentication failed ({status}): {body}")]
    Authentication {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("upstream rate limit exceeded ({status}): {body}")]
    RateLimited {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("api error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to parse stream chunk: {0}")]
    StreamParse(#[source] serde_json::Error),
}

impl TutorError {
    /// Builds the error for a non-2xx upstream response.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 => Self::Authentication { status, body },
            429 => Self::RateLimited { status, body },
            _ => Self::Api { status, body },
        }
    }
}

pub type Result<T> = std::result::Result<T, TutorError>;
