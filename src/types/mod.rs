use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo";

/// Literal `data:` payload the upstream sends to mark the end of a completion.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Request body sent to the chat-completion endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StreamPayload {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

impl StreamPayload {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// One decoded server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.data == DONE_SENTINEL
    }
}

/// Typed view over an OpenAI-style streaming chunk. Only
/// `choices[0].delta.content` is read; everything else is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct UpstreamChunk {
    #[serde(default)]
    choices: Vec<UpstreamChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct UpstreamChoice {
    #[serde(default)]
    delta: Option<UpstreamDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct UpstreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl UpstreamChunk {
    pub fn into_text(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub text: String,
}

impl NormalizedEvent {
    /// Renders the event as a single SSE frame: `data: {"text":...}\n\n`.
    pub fn to_sse_frame(&self) -> serde_json::Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("data: {json}\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_payload_serializes_with_stream_flag() -> serde_json::Result<()> {
        let payload = StreamPayload::new(
            DEFAULT_MODEL,
            vec![ChatMessage::system("teach"), ChatMessage::user("hi")],
        );
        let value = serde_json::to_value(&payload)?;
        assert_eq!(
            value,
            serde_json::json!({
                "model": DEFAULT_MODEL,
                "messages": [
                    {"role": "system", "content": "teach"},
                    {"role": "user", "content": "hi"}
                ],
                "stream": true
            })
        );
        Ok(())
    }

    #[test]
    fn conversation_history_keeps_assistant_turns() -> serde_json::Result<()> {
        let history: Vec<ChatMessage> = serde_json::from_str(
            r#"[{"role":"user","content":"what is mitosis?"},{"role":"assistant","content":"Cell division."}]"#,
        )?;
        assert_eq!(
            history,
            vec![
                ChatMessage::user("what is mitosis?"),
                ChatMessage::assistant("Cell division."),
            ]
        );
        assert_eq!(
            serde_json::to_value(ChatMessage::assistant("ok"))?,
            serde_json::json!({"role": "assistant", "content": "ok"})
        );
        Ok(())
    }

    #[test]
    fn upstream_chunk_defaults_missing_content_to_empty() -> serde_json::Result<()> {
        let chunk: UpstreamChunk = serde_json::from_str(r#"{"choices":[{"delta":{"content":"hi"}}]}"#)?;
        assert_eq!(chunk.into_text(), "hi");

        for raw in [
            r#"{}"#,
            r#"{"choices":[]}"#,
            r#"{"choices":[{}]}"#,
            r#"{"choices":[{"delta":{}}]}"#,
            r#"{"choices":[{"delta":{"content":null}}]}"#,
            r#"{"choices":[{"delta":{"role":"assistant"},"finish_reason":null}]}"#,
        ] {
            let chunk: UpstreamChunk = serde_json::from_str(raw)?;
            assert_eq!(chunk.into_text(), "", "payload: {raw}");
        }
        Ok(())
    }

    #[test]
    fn normalized_event_renders_sse_frame() -> serde_json::Result<()> {
        let event = NormalizedEvent {
            text: "a \"quote\"\n".to_string(),
        };
        assert_eq!(event.to_sse_frame()?, "data: {\"text\":\"a \\\"quote\\\"\\n\"}\n\n");
        Ok(())
    }
}
