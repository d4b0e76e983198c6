use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};

use crate::types::{NormalizedEvent, SseEvent, UpstreamChunk};
use crate::{Result, TutorError};

/// Number of leading newline-only deltas dropped before real content.
pub const DEFAULT_LEADING_NEWLINE_EVENTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractStep {
    Emit(NormalizedEvent),
    Skip,
    Done,
}

/// Turns upstream chat-completion events into normalized `{text}` events.
///
/// Providers often open a completion with one or two purely structural
/// newline deltas. While fewer than `leading_newline_events` events have been
/// emitted, deltas made only of `\n` are skipped; skipping does not advance
/// the counter. Once the counter reaches the threshold every delta is emitted
/// verbatim.
#[derive(Debug, Clone)]
pub struct TokenExtractor {
    emitted: usize,
    leading_newline_events: usize,
}

impl Default for TokenExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenExtractor {
    pub fn new() -> Self {
        Self::with_leading_newline_events(DEFAULT_LEADING_NEWLINE_EVENTS)
    }

    pub fn with_leading_newline_events(leading_newline_events: usize) -> Self {
        Self {
            emitted: 0,
            leading_newline_events,
        }
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn process(&mut self, event: &SseEvent) -> Result<ExtractStep> {
        if event.is_done() {
            return Ok(ExtractStep::Done);
        }

        let chunk: UpstreamChunk =
            serde_json::from_str(&event.data).map_err(TutorError::StreamParse)?;
        let text = chunk.into_text();

        if self.emitted < self.leading_newline_events && is_newline_only(&text) {
            return Ok(ExtractStep::Skip);
        }

        self.emitted += 1;
        Ok(ExtractStep::Emit(NormalizedEvent { text }))
    }
}

fn is_newline_only(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|ch| ch == '\n')
}

/// Runs a fresh extractor over an already-buffered list of events.
pub fn extract_all(
    events: &[SseEvent],
    mut extractor: TokenExtractor,
) -> Result<Vec<NormalizedEvent>> {
    let mut out = Vec::new();
    for event in events {
        match extractor.process(event)? {
            ExtractStep::Emit(normalized) => out.push(normalized),
            ExtractStep::Skip => {}
            ExtractStep::Done => break,
        }
    }
    Ok(out)
}

/// Re-encodes a decoded upstream event stream as normalized SSE frames.
///
/// The returned stream ends at the terminal sentinel or when the source ends.
/// The first error (framing, transport or a malformed chunk) is yielded once
/// and terminates the stream.
pub fn normalize_stream(
    events: BoxStream<'static, Result<SseEvent>>,
    extractor: TokenExtractor,
) -> BoxStream<'static, Result<Bytes>> {
    Box::pin(stream::try_unfold(
        (events, extractor),
        |(mut events, mut extractor)| async move {
            while let Some(event) = events.next().await {
                let event = event?;
                match extractor.process(&event)? {
                    ExtractStep::Emit(normalized) => {
                        let frame = normalized
                            .to_sse_frame()
                            .map_err(TutorError::StreamParse)?;
                        return Ok(Some((Bytes::from(frame), (events, extractor))));
                    }
                    ExtractStep::Skip => continue,
                    ExtractStep::Done => return Ok(None),
                }
            }
            Ok(None)
        },
    ))
}
