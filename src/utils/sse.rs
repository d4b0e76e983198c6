use futures_util::TryStreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;

use crate::Result;
use crate::types::SseEvent;

#[derive(Clone, Copy, Debug)]
pub struct SseLimits {
    pub max_line_bytes: usize,
    pub max_event_bytes: usize,
}

impl Default for SseLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 256 * 1024,
            max_event_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Default)]
struct EventBuffer {
    event: Option<String>,
    data: String,
    has_data: bool,
}

impl EventBuffer {
    fn clear(&mut self) {
        self.event = None;
        self.data.clear();
        self.has_data = false;
    }

    fn is_empty(&self) -> bool {
        self.event.is_none() && !self.has_data
    }

    fn take(&mut self) -> SseEvent {
        let event = SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data),
        };
        self.has_data = false;
        event
    }
}

async fn read_next_line_bytes_limited<R>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    if max_bytes == 0 {
        return Err(crate::TutorError::InvalidResponse(
            "max_bytes must be > 0".to_string(),
        ));
    }

    out.clear();

    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(!out.is_empty());
        }

        let newline_pos = buf.iter().position(|b| *b == b'\n');
        let take_len = newline_pos.map(|pos| pos + 1).unwrap_or(buf.len());

        if out.len().saturating_add(take_len) > max_bytes {
            return Err(crate::TutorError::InvalidResponse(format!(
                "SSE line exceeds max_line_bytes={max_bytes}"
            )));
        }

        out.extend_from_slice(&buf[..take_len]);
        reader.consume(take_len);

        if newline_pos.is_some() {
            return Ok(true);
        }
    }
}

async fn read_next_sse_event_with_limits<R>(
    reader: &mut R,
    line_bytes: &mut Vec<u8>,
    buffer: &mut EventBuffer,
    limits: SseLimits,
) -> Result<Option<SseEvent>>
where
    R: AsyncBufRead + Unpin,
{
    if limits.max_event_bytes == 0 {
        return Err(crate::TutorError::InvalidResponse(
            "max_event_bytes must be > 0".to_string(),
        ));
    }

    buffer.clear();

    loop {
        let has_line = read_next_line_bytes_limited(reader, line_bytes, limits.max_line_bytes)
            .await
            .map_err(|err| {
                crate::TutorError::InvalidResponse(format!("failed to read SSE line: {err}"))
            })?;
        if !has_line {
            // An event is only complete once its blank line arrives.
            if !buffer.is_empty() {
                tracing::debug!("discarding incomplete SSE event at end of stream");
            }
            return Ok(None);
        }

        let line = std::str::from_utf8(line_bytes).map_err(|err| {
            crate::TutorError::InvalidResponse(format!("invalid SSE UTF-8: {err}"))
        })?;
        let line = line.trim_end_matches(['\r', '\n']);

        if line.is_empty() {
            if !buffer.has_data {
                buffer.clear();
                continue;
            }
            return Ok(Some(buffer.take()));
        }

        if line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                let separator_bytes = usize::from(buffer.has_data);
                if buffer
                    .data
                    .len()
                    .saturating_add(separator_bytes)
                    .saturating_add(value.len())
                    > limits.max_event_bytes
                {
                    return Err(crate::TutorError::InvalidResponse(format!(
                        "SSE event exceeds max_event_bytes={}",
                        limits.max_event_bytes
                    )));
                }
                if separator_bytes == 1 {
                    buffer.data.push('\n');
                }
                buffer.data.push_str(value);
                buffer.has_data = true;
            }
            "event" => buffer.event = Some(value.to_string()),
            _ => {}
        }
    }
}

pub fn sse_event_stream_from_reader_with_limits<R>(
    reader: R,
    limits: SseLimits,
) -> BoxStream<'static, Result<SseEvent>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    Box::pin(stream::try_unfold(
        (reader, Vec::<u8>::new(), EventBuffer::default(), limits),
        |(mut reader, mut line_bytes, mut buffer, limits)| async move {
            match read_next_sse_event_with_limits(&mut reader, &mut line_bytes, &mut buffer, limits)
                .await?
            {
                Some(event) => Ok(Some((event, (reader, line_bytes, buffer, limits)))),
                None => Ok(None),
            }
        },
    ))
}

pub fn sse_event_stream_from_reader<R>(reader: R) -> BoxStream<'static, Result<SseEvent>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    sse_event_stream_from_reader_with_limits(reader, SseLimits::default())
}

pub fn sse_event_stream_from_response(
    response: reqwest::Response,
    limits: SseLimits,
) -> BoxStream<'static, Result<SseEvent>> {
    let byte_stream = response.bytes_stream().map_err(std::io::Error::other);
    let reader = StreamReader::new(byte_stream);
    sse_event_stream_from_reader_with_limits(tokio::io::BufReader::new(reader), limits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use futures_util::stream;

    async fn collect_chunks(chunks: &[&[u8]]) -> crate::Result<Vec<SseEvent>> {
        let chunks: Vec<_> = chunks
            .iter()
            .map(|chunk| Ok::<_, std::io::Error>(Bytes::copy_from_slice(chunk)))
            .collect();
        let stream = stream::iter(chunks);
        let reader = StreamReader::new(stream);
        let mut events = sse_event_stream_from_reader(tokio::io::BufReader::new(reader));
        let mut out = Vec::new();
        while let Some(item) = events.next().await {
            out.push(item?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn parses_event_names_and_multiline_data() -> crate::Result<()> {
        let out = collect_chunks(&[
            b"event: message\ndata: {\"hello\":1}\n\ndata: line1\ndata: line2\n\ndata: [DONE]\n\n",
        ])
        .await?;

        assert_eq!(
            out,
            vec![
                SseEvent {
                    event: Some("message".to_string()),
                    data: "{\"hello\":1}".to_string(),
                },
                SseEvent::data("line1\nline2"),
                SseEvent::data("[DONE]"),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn reassembles_an_event_split_across_chunks() -> crate::Result<()> {
        let out = collect_chunks(&[
            b"data: first\n\ndata: second\n\ndata: thi",
            b"rd\n\n",
        ])
        .await?;

        assert_eq!(
            out,
            vec![
                SseEvent::data("first"),
                SseEvent::data("second"),
                SseEvent::data("third"),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn handles_splits_inside_field_name_and_terminator() -> crate::Result<()> {
        let out = collect_chunks(&[b"da", b"ta: a\n", b"\n", b"data: b\r", b"\n\r\n"]).await?;
        assert_eq!(out, vec![SseEvent::data("a"), SseEvent::data("b")]);
        Ok(())
    }

    #[tokio::test]
    async fn handles_split_multibyte_characters() -> crate::Result<()> {
        let snowman = "data: \u{2603}\n\n".as_bytes();
        let (head, tail) = snowman.split_at(7);

        let out = collect_chunks(&[head, tail]).await?;
        assert_eq!(out, vec![SseEvent::data("\u{2603}")]);
        Ok(())
    }

    #[tokio::test]
    async fn ignores_comments_and_unknown_fields() -> crate::Result<()> {
        let out = collect_chunks(&[
            b": keep-alive\n\nid: 7\nretry: 1000\ndata:tight\n\nevent: ping\n\n",
        ])
        .await?;
        assert_eq!(out, vec![SseEvent::data("tight")]);
        Ok(())
    }

    #[tokio::test]
    async fn drops_incomplete_trailing_event() -> crate::Result<()> {
        let out = collect_chunks(&[b"data: done\n\ndata: partial\n"]).await?;
        assert_eq!(out, vec![SseEvent::data("done")]);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_sse_lines_over_max_line_bytes() -> crate::Result<()> {
        let sse = format!("data: {}\n\n", "x".repeat(1024));
        let stream = stream::iter([Ok::<_, std::io::Error>(Bytes::from(sse))]);
        let reader = StreamReader::new(stream);

        let mut events = sse_event_stream_from_reader_with_limits(
            tokio::io::BufReader::new(reader),
            SseLimits {
                max_line_bytes: 64,
                max_event_bytes: 4096,
            },
        );

        let err = events.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("max_line_bytes"));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_sse_events_over_max_event_bytes() -> crate::Result<()> {
        let sse = format!("data: {}\ndata: {}\n\n", "a".repeat(100), "b".repeat(100));
        let stream = stream::iter([Ok::<_, std::io::Error>(Bytes::from(sse))]);
        let reader = StreamReader::new(stream);

        let mut events = sse_event_stream_from_reader_with_limits(
            tokio::io::BufReader::new(reader),
            SseLimits {
                max_line_bytes: 4096,
                max_event_bytes: 128,
            },
        );

        let err = events.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("max_event_bytes"));
        Ok(())
    }
}
