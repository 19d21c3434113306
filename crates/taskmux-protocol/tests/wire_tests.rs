//! Wire protocol integration tests
//!
//! Tests for:
//! - Parsing every documented payload on every channel
//! - Defensive handling of unknown or malformed payloads
//! - EventSource listeners delivering raw payloads through a sink

use async_trait::async_trait;
use support::SinkLog;
use serde_json::json;
use std::sync::Arc;
use taskmux_protocol::{
    parse_event, Channel, EventKind, EventSink, EventSource, ProtocolError, SessionUpdate,
    StreamEvent, TokenUsage, ToolUpdate, Unsubscribe,
};

mod support {
    use std::sync::Mutex;

    /// Records every payload delivered to a sink
    #[derive(Default)]
    pub struct SinkLog {
        pub payloads: Mutex<Vec<serde_json::Value>>,
    }
}

mod stream_channel_tests {
    use super::*;

    #[test]
    fn test_all_stream_types() {
        let cases = vec![
            (
                json!({"type": "text_delta", "content": "Hello", "session_id": "t"}),
                StreamEvent::TextDelta {
                    content: "Hello".to_string(),
                },
            ),
            (
                json!({"type": "thinking_start", "session_id": "t"}),
                StreamEvent::ThinkingStart { content: None },
            ),
            (
                json!({"type": "thinking_delta", "delta": "hmm", "session_id": "t"}),
                StreamEvent::ThinkingDelta {
                    content: "hmm".to_string(),
                },
            ),
            (
                json!({"type": "tool_start", "tool_name": "Grep", "tool_id": "c1", "session_id": "t"}),
                StreamEvent::ToolStart {
                    tool_id: Some("c1".to_string()),
                    tool_name: "Grep".to_string(),
                },
            ),
            (
                json!({"type": "error", "message": "rate limited", "session_id": "t"}),
                StreamEvent::Error {
                    message: "rate limited".to_string(),
                },
            ),
            (
                json!({
                    "type": "complete",
                    "result": "done",
                    "usage": {"input_tokens": 12, "output_tokens": 34},
                    "session_id": "t"
                }),
                StreamEvent::Complete {
                    result: Some("done".to_string()),
                    usage: Some(TokenUsage::new(12, 34)),
                },
            ),
        ];

        for (raw, expected) in cases {
            let event = parse_event(Channel::Stream, &raw)
                .unwrap_or_else(|| panic!("payload should parse: {}", raw));
            assert_eq!(event.session_id, "t");
            assert_eq!(event.kind, EventKind::Stream(expected));
        }
    }

    #[test]
    fn test_error_without_message_gets_placeholder() {
        let raw = json!({"type": "error", "session_id": "t"});
        let event = parse_event(Channel::Stream, &raw).unwrap();
        assert_eq!(
            event.kind,
            EventKind::Stream(StreamEvent::Error {
                message: "Unknown error".to_string()
            })
        );
    }

    #[test]
    fn test_non_string_session_id_is_ignored() {
        let raw = json!({"type": "text_delta", "content": "x", "session_id": 42});
        assert!(parse_event(Channel::Stream, &raw).is_none());
    }
}

mod tool_channel_tests {
    use super::*;

    #[test]
    fn test_started_update() {
        let raw = json!({
            "execution": {"id": "e-7", "tool_name": "Write"},
            "update_type": "started",
            "session_id": "t"
        });
        let event = parse_event(Channel::Tool, &raw).unwrap();
        assert_eq!(
            event.kind,
            EventKind::Tool(ToolUpdate::Started {
                execution_id: "e-7".to_string(),
                tool_name: "Write".to_string(),
            })
        );
    }

    #[test]
    fn test_completed_failure() {
        let raw = json!({
            "execution": {"id": "e-7", "tool_name": "Write", "success": false, "error": "denied"},
            "update_type": "completed",
            "session_id": "t"
        });
        let event = parse_event(Channel::Tool, &raw).unwrap();
        assert_eq!(
            event.kind,
            EventKind::Tool(ToolUpdate::Completed {
                execution_id: "e-7".to_string(),
                tool_name: "Write".to_string(),
                success: false,
                error: Some("denied".to_string()),
            })
        );
    }

    #[test]
    fn test_missing_execution_is_ignored() {
        let raw = json!({"update_type": "started", "session_id": "t"});
        assert!(parse_event(Channel::Tool, &raw).is_none());
    }
}

mod session_channel_tests {
    use super::*;

    #[test]
    fn test_completed_state() {
        let raw = json!({"session": {"id": "t", "state": "completed"}, "session_id": "t"});
        let event = parse_event(Channel::Session, &raw).unwrap();
        assert_eq!(event.kind, EventKind::Session(SessionUpdate::Completed));
    }

    #[test]
    fn test_unknown_state_is_ignored() {
        let raw = json!({"session": {"id": "t", "state": "paused"}, "session_id": "t"});
        assert!(parse_event(Channel::Session, &raw).is_none());
    }
}

/// Source that acknowledges every channel and hands payloads to the sink
struct LoopbackSource {
    log: Arc<SinkLog>,
}

#[async_trait]
impl EventSource for LoopbackSource {
    async fn listen(
        &self,
        channel: Channel,
        sink: EventSink,
    ) -> Result<Unsubscribe, ProtocolError> {
        if channel == Channel::Session {
            return Err(ProtocolError::Subscription {
                channel: channel.to_string(),
                message: "not supported".to_string(),
            });
        }
        sink(json!({"type": "text_delta", "content": "hi", "session_id": "t"}));
        let log = self.log.clone();
        Ok(Unsubscribe::new(move || {
            log.payloads.lock().unwrap().push(json!({"unsubscribed": true}));
        }))
    }
}

#[tokio::test]
async fn test_event_source_delivers_to_sink() {
    let log = Arc::new(SinkLog::default());
    let source = LoopbackSource { log: log.clone() };

    let sink_log = log.clone();
    let sink: EventSink = Arc::new(move |value| sink_log.payloads.lock().unwrap().push(value));

    let handle = source.listen(Channel::Stream, sink.clone()).await.unwrap();
    assert_eq!(log.payloads.lock().unwrap().len(), 1);

    let delivered = log.payloads.lock().unwrap()[0].clone();
    assert!(parse_event(Channel::Stream, &delivered).is_some());

    handle.call();
    assert_eq!(log.payloads.lock().unwrap().len(), 2);

    let err = source.listen(Channel::Session, sink).await.unwrap_err();
    assert!(err.to_string().contains("session-update"));
}
