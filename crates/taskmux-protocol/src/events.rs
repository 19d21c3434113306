//! Inbound backend events
//!
//! Every channel delivers untyped JSON. `parse_event` is the single place
//! where that untrusted shape is turned into a typed [`TaggedEvent`];
//! anything it does not recognise is dropped here and never reaches the
//! multiplexer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Backend event channels the multiplexer subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Streamed model output: text, thinking, tool calls, errors, completion
    Stream,
    /// Tool execution lifecycle updates
    Tool,
    /// Session-level state changes (error, cancelled, completed)
    Session,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Stream, Channel::Tool, Channel::Session];

    /// Event name used by transports for this channel
    pub fn event_name(&self) -> &'static str {
        match self {
            Channel::Stream => "task-stream",
            Channel::Tool => "tool-execution-update",
            Channel::Session => "session-update",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Token counters reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Sum of two usage reports
    pub fn accumulate(self, other: TokenUsage) -> Self {
        Self {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
        }
    }
}

/// Events from the stream channel
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta {
        content: String,
    },
    ThinkingStart {
        content: Option<String>,
    },
    ThinkingDelta {
        content: String,
    },
    ToolStart {
        tool_id: Option<String>,
        tool_name: String,
    },
    ToolResult {
        tool_id: Option<String>,
        tool_name: String,
        success: bool,
        error: Option<String>,
    },
    Error {
        message: String,
    },
    Complete {
        result: Option<String>,
        usage: Option<TokenUsage>,
    },
}

/// Events from the tool channel
#[derive(Debug, Clone, PartialEq)]
pub enum ToolUpdate {
    Started {
        execution_id: String,
        tool_name: String,
    },
    Completed {
        execution_id: String,
        tool_name: String,
        success: bool,
        error: Option<String>,
    },
}

/// Events from the session-control channel
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Failed { message: Option<String> },
    Cancelled { message: Option<String> },
    /// The backend considers the session done; the stream channel's
    /// `complete` may still be on its way
    Completed,
}

/// Typed event, independent of the channel that delivered it
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Stream(StreamEvent),
    Tool(ToolUpdate),
    Session(SessionUpdate),
}

/// A typed event plus the backend correlation id it was tagged with
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub session_id: String,
    pub kind: EventKind,
}

impl TaggedEvent {
    pub fn new(session_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
        }
    }

    pub fn stream(session_id: impl Into<String>, event: StreamEvent) -> Self {
        Self::new(session_id, EventKind::Stream(event))
    }

    pub fn tool(session_id: impl Into<String>, update: ToolUpdate) -> Self {
        Self::new(session_id, EventKind::Tool(update))
    }

    pub fn session(session_id: impl Into<String>, update: SessionUpdate) -> Self {
        Self::new(session_id, EventKind::Session(update))
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireStreamEvent {
    TextDelta {
        #[serde(default, alias = "delta")]
        content: String,
    },
    ThinkingStart {
        #[serde(default)]
        content: Option<String>,
    },
    ThinkingDelta {
        #[serde(default, alias = "delta")]
        content: String,
    },
    ToolStart {
        #[serde(default, alias = "tool_call_id", alias = "tool_use_id")]
        tool_id: Option<String>,
        #[serde(default, alias = "name")]
        tool_name: Option<String>,
    },
    ToolResult {
        #[serde(default, alias = "tool_call_id", alias = "tool_use_id")]
        tool_id: Option<String>,
        #[serde(default, alias = "name")]
        tool_name: Option<String>,
        #[serde(default)]
        success: Option<bool>,
        #[serde(default)]
        is_error: Option<bool>,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default, alias = "error")]
        message: Option<String>,
    },
    Complete {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireToolUpdate {
    execution: WireExecution,
    #[serde(default)]
    update_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireExecution {
    id: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSessionUpdate {
    session: WireSession,
    #[serde(default)]
    update_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSession {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

const UNKNOWN_TOOL: &str = "unknown";

/// Parse a raw payload received on `channel`.
///
/// Returns `None` for payloads without a correlation id, with an
/// unrecognised `type`/state, or that do not match the channel's shape.
pub fn parse_event(channel: Channel, raw: &Value) -> Option<TaggedEvent> {
    let event = match channel {
        Channel::Stream => parse_stream(raw),
        Channel::Tool => parse_tool(raw),
        Channel::Session => parse_session(raw),
    };
    if event.is_none() {
        debug!("Ignoring unrecognised {} payload", channel);
    }
    event
}

fn session_id_of(raw: &Value) -> Option<String> {
    raw.get("session_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn parse_stream(raw: &Value) -> Option<TaggedEvent> {
    let session_id = session_id_of(raw)?;
    let wire: WireStreamEvent = serde_json::from_value(raw.clone()).ok()?;

    let event = match wire {
        WireStreamEvent::TextDelta { content } => StreamEvent::TextDelta { content },
        WireStreamEvent::ThinkingStart { content } => StreamEvent::ThinkingStart { content },
        WireStreamEvent::ThinkingDelta { content } => StreamEvent::ThinkingDelta { content },
        WireStreamEvent::ToolStart { tool_id, tool_name } => StreamEvent::ToolStart {
            tool_id,
            tool_name: tool_name.unwrap_or_else(|| UNKNOWN_TOOL.to_string()),
        },
        WireStreamEvent::ToolResult {
            tool_id,
            tool_name,
            success,
            is_error,
            error,
        } => {
            let success =
                success.unwrap_or_else(|| !is_error.unwrap_or(false) && error.is_none());
            StreamEvent::ToolResult {
                tool_id,
                tool_name: tool_name.unwrap_or_else(|| UNKNOWN_TOOL.to_string()),
                success,
                error,
            }
        }
        WireStreamEvent::Error { message } => StreamEvent::Error {
            message: message.unwrap_or_else(|| "Unknown error".to_string()),
        },
        WireStreamEvent::Complete { result, usage } => StreamEvent::Complete { result, usage },
        WireStreamEvent::Unknown => return None,
    };

    Some(TaggedEvent::stream(session_id, event))
}

fn parse_tool(raw: &Value) -> Option<TaggedEvent> {
    let session_id = session_id_of(raw)?;
    let wire: WireToolUpdate = serde_json::from_value(raw.clone()).ok()?;
    let WireExecution {
        id,
        tool_name,
        success,
        error,
    } = wire.execution;
    let tool_name = tool_name.unwrap_or_else(|| UNKNOWN_TOOL.to_string());

    let update = match wire.update_type.as_deref() {
        Some("started") => ToolUpdate::Started {
            execution_id: id,
            tool_name,
        },
        Some("completed") => ToolUpdate::Completed {
            execution_id: id,
            tool_name,
            success: success.unwrap_or(error.is_none()),
            error,
        },
        _ => return None,
    };

    Some(TaggedEvent::tool(session_id, update))
}

fn parse_session(raw: &Value) -> Option<TaggedEvent> {
    let wire: WireSessionUpdate = serde_json::from_value(raw.clone()).ok()?;
    let session_id = session_id_of(raw).or_else(|| wire.session.id.clone().filter(|id| !id.is_empty()))?;

    // Older backends put the state in `update_type` only
    let state = wire.session.state.or(wire.update_type)?;
    let update = match state.as_str() {
        "error" | "failed" => SessionUpdate::Failed {
            message: wire.session.error_message,
        },
        "cancelled" | "canceled" => SessionUpdate::Cancelled {
            message: wire.session.error_message,
        },
        "completed" => SessionUpdate::Completed,
        _ => return None,
    };

    Some(TaggedEvent::session(session_id, update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_text_delta() {
        let raw = json!({"type": "text_delta", "content": "hi", "session_id": "s-1"});
        let event = parse_event(Channel::Stream, &raw).unwrap();
        assert_eq!(event.session_id, "s-1");
        assert_eq!(
            event.kind,
            EventKind::Stream(StreamEvent::TextDelta {
                content: "hi".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_stream_type_is_ignored() {
        let raw = json!({"type": "heartbeat", "session_id": "s-1"});
        assert!(parse_event(Channel::Stream, &raw).is_none());
    }

    #[test]
    fn test_missing_session_id_is_ignored() {
        let raw = json!({"type": "text_delta", "content": "hi"});
        assert!(parse_event(Channel::Stream, &raw).is_none());

        let raw = json!({"type": "text_delta", "content": "hi", "session_id": ""});
        assert!(parse_event(Channel::Stream, &raw).is_none());
    }

    #[test]
    fn test_tool_result_success_inferred_from_error() {
        let raw = json!({
            "type": "tool_result",
            "tool_call_id": "call-1",
            "tool_name": "Read",
            "error": "no such file",
            "session_id": "s-1"
        });
        let event = parse_event(Channel::Stream, &raw).unwrap();
        match event.kind {
            EventKind::Stream(StreamEvent::ToolResult {
                tool_id, success, ..
            }) => {
                assert_eq!(tool_id.as_deref(), Some("call-1"));
                assert!(!success);
            }
            other => panic!("Expected ToolResult, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_tool_channel() {
        let raw = json!({
            "execution": {"id": "exec-1", "tool_name": "Bash", "success": true},
            "update_type": "completed",
            "session_id": "s-2"
        });
        let event = parse_event(Channel::Tool, &raw).unwrap();
        assert_eq!(
            event.kind,
            EventKind::Tool(ToolUpdate::Completed {
                execution_id: "exec-1".to_string(),
                tool_name: "Bash".to_string(),
                success: true,
                error: None,
            })
        );
    }

    #[test]
    fn test_tool_channel_unknown_update_type() {
        let raw = json!({
            "execution": {"id": "exec-1", "tool_name": "Bash"},
            "update_type": "progress",
            "session_id": "s-2"
        });
        assert!(parse_event(Channel::Tool, &raw).is_none());
    }

    #[test]
    fn test_parse_session_channel() {
        let raw = json!({
            "session": {"id": "s-3", "state": "error", "error_message": "quota exceeded"},
            "update_type": "state_changed",
            "session_id": "s-3"
        });
        let event = parse_event(Channel::Session, &raw).unwrap();
        assert_eq!(
            event.kind,
            EventKind::Session(SessionUpdate::Failed {
                message: Some("quota exceeded".to_string())
            })
        );
    }

    #[test]
    fn test_session_id_falls_back_to_session_object() {
        let raw = json!({"session": {"id": "s-4", "state": "cancelled"}});
        let event = parse_event(Channel::Session, &raw).unwrap();
        assert_eq!(event.session_id, "s-4");
        assert_eq!(
            event.kind,
            EventKind::Session(SessionUpdate::Cancelled { message: None })
        );
    }

    #[test]
    fn test_wrong_shape_for_channel() {
        let raw = json!({"type": "text_delta", "content": "hi", "session_id": "s-1"});
        assert!(parse_event(Channel::Tool, &raw).is_none());
        assert!(parse_event(Channel::Session, &raw).is_none());
        assert!(parse_event(Channel::Stream, &json!("not an object")).is_none());
    }

    #[test]
    fn test_usage_accumulate() {
        let total = TokenUsage::new(10, 5).accumulate(TokenUsage::new(1, 2));
        assert_eq!(total, TokenUsage::new(11, 7));
        assert_eq!(total.total(), 18);
    }
}
