//! Streaming chat-completion proxy for a tutoring front end.
//!
//! The library decodes the upstream provider's server-sent events, extracts
//! the text deltas and re-encodes them as a minimal SSE stream. The HTTP
//! surface lives behind the `gateway` feature.

mod error;
pub mod prompt;
pub mod stream;
pub mod types;
pub mod upstream;
pub mod utils;

#[cfg(feature = "gateway")]
pub mod gateway;

pub use error::{Result, TutorError};
pub use prompt::{WebSource, build_system_prompt, clean_text};
pub use stream::{ExtractStep, TokenExtractor, extract_all, normalize_stream};
pub use types::{ChatMessage, NormalizedEvent, Role, SseEvent, StreamPayload};
pub use upstream::UpstreamClient;
