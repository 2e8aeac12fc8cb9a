use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use graphrun_core::error::{GraphError, Result};
use graphrun_core::types::{ChatResponse, ToolCall};

/// One event of the model service's completion stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token {
        #[serde(default)]
        content: String,
    },
    FinalResponse {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        parsed: Option<Value>,
    },
    ToolCallRequired {
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
        #[serde(default)]
        configurable: Option<Checkpoint>,
    },
    End,
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Thinking, progress, tool echoes and other events the engine ignores.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub checkpoint_id: Option<String>,
}

impl StreamEvent {
    /// Decode a `data:` payload. Malformed payloads are skipped with a warning.
    pub fn parse(data: &str) -> Option<Self> {
        match serde_json::from_str(data) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(data, error = %e, "Failed to parse model stream event");
                None
            }
        }
    }
}

/// Folds stream events into a [`ChatResponse`].
///
/// Tokens accumulate into the assistant text; a `final_response` overrides
/// it. A tool-call request or an error ends the fold immediately.
#[derive(Default)]
pub struct ChatAccumulator {
    text: String,
    final_message: Option<String>,
    parsed: Option<Value>,
    finished: bool,
}

impl ChatAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns the response once the stream has decided it.
    pub fn push(&mut self, event: StreamEvent) -> Option<Result<ChatResponse>> {
        match event {
            StreamEvent::Token { content } => self.text.push_str(&content),
            StreamEvent::FinalResponse { message, parsed } => {
                self.final_message = message;
                if parsed.as_ref().is_some_and(|p| !p.is_null()) {
                    self.parsed = parsed;
                }
            }
            StreamEvent::ToolCallRequired {
                tool_calls,
                configurable,
            } => {
                debug!(calls = tool_calls.len(), "Model requested tool calls");
                return Some(Ok(ChatResponse::ToolCalls {
                    calls: tool_calls,
                    checkpoint_id: configurable.and_then(|c| c.checkpoint_id),
                }));
            }
            StreamEvent::Error { error, message } => {
                let reason = message
                    .or(error)
                    .unwrap_or_else(|| "unknown error".to_string());
                return Some(Err(GraphError::ModelResponse(reason)));
            }
            StreamEvent::End => {
                self.finished = true;
                return Some(Ok(self.take()));
            }
            StreamEvent::Other => {}
        }
        None
    }

    /// Response for a stream that closed without an `end` event.
    pub fn finish(mut self) -> ChatResponse {
        self.take()
    }

    fn take(&mut self) -> ChatResponse {
        let message = self.final_message.take().or_else(|| {
            let text = std::mem::take(&mut self.text);
            (!text.is_empty()).then_some(text)
        });
        ChatResponse::Final {
            message,
            parsed: self.parsed.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fold(payloads: &[&str]) -> Result<ChatResponse> {
        let mut acc = ChatAccumulator::new();
        for payload in payloads {
            if let Some(event) = StreamEvent::parse(payload) {
                if let Some(response) = acc.push(event) {
                    return response;
                }
            }
        }
        Ok(acc.finish())
    }

    #[test]
    fn test_tokens_accumulate_until_end() {
        let response = fold(&[
            r#"{"type":"token","content":"Hel"}"#,
            r#"{"type":"thinking","content":"hmm"}"#,
            r#"{"type":"token","content":"lo"}"#,
            r#"{"type":"end"}"#,
        ])
        .unwrap();
        assert_eq!(
            response,
            ChatResponse::Final {
                message: Some("Hello".into()),
                parsed: None
            }
        );
    }

    #[test]
    fn test_final_response_wins_over_tokens() {
        let response = fold(&[
            r#"{"type":"token","content":"partial"}"#,
            r#"{"type":"final_response","message":"full","parsed":{"a":1}}"#,
            r#"{"type":"end"}"#,
        ])
        .unwrap();
        assert_eq!(
            response,
            ChatResponse::Final {
                message: Some("full".into()),
                parsed: Some(json!({ "a": 1 }))
            }
        );
    }

    #[test]
    fn test_tool_call_required() {
        let response = fold(&[r#"{
            "type": "tool_call_required",
            "session_id": "s",
            "tool_calls": [{ "tool_call_id": "c1", "name": "add", "args": { "a": 1 } }],
            "configurable": { "thread_id": "t", "checkpoint_ns": "", "checkpoint_id": "cp-9" }
        }"#])
        .unwrap();
        match response {
            ChatResponse::ToolCalls {
                calls,
                checkpoint_id,
            } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "c1");
                assert_eq!(checkpoint_id.as_deref(), Some("cp-9"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_error_event_fails() {
        let err = fold(&[r#"{"type":"error","error":"quota exceeded"}"#]).unwrap_err();
        assert!(matches!(err, GraphError::ModelResponse(m) if m == "quota exceeded"));
    }

    #[test]
    fn test_malformed_events_skipped() {
        let response = fold(&["not json", r#"{"type":"token","content":"ok"}"#]).unwrap();
        assert_eq!(
            response,
            ChatResponse::Final {
                message: Some("ok".into()),
                parsed: None
            }
        );
    }
}
