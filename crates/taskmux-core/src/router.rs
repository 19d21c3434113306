//! Event application
//!
//! Turns one typed backend event into buffer lines and status changes on a
//! single session. Deciding *which* session an event belongs to is the
//! multiplexer's job; everything here works on a `&mut SessionState`.

use taskmux_protocol::{EventKind, SessionUpdate, StreamEvent, TokenUsage, ToolUpdate};

use crate::buffer::LineKind;
use crate::history::SessionSummary;
use crate::multiplexer::Effect;
use crate::session::{SessionState, SessionStatus};

/// Preferences that influence what gets buffered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterPrefs {
    pub show_thinking: bool,
}

/// Result of applying one event
#[derive(Debug, Default)]
pub(crate) struct Applied {
    /// The session state was modified
    pub changed: bool,
    pub effects: Vec<Effect>,
}

impl Applied {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed() -> Self {
        Self {
            changed: true,
            effects: Vec::new(),
        }
    }

    fn with_effect(effect: Effect) -> Self {
        Self {
            changed: true,
            effects: vec![effect],
        }
    }
}

pub(crate) fn apply_event(state: &mut SessionState, kind: &EventKind, prefs: RouterPrefs) -> Applied {
    match kind {
        EventKind::Stream(event) => apply_stream(state, event, prefs),
        EventKind::Tool(ToolUpdate::Started {
            execution_id,
            tool_name,
        }) => tool_started(state, Some(execution_id.as_str()), tool_name),
        EventKind::Tool(ToolUpdate::Completed {
            execution_id,
            tool_name,
            success,
            error,
        }) => tool_finished(
            state,
            Some(execution_id.as_str()),
            tool_name,
            *success,
            error.as_deref(),
        ),
        EventKind::Session(update) => apply_session(state, update),
    }
}

fn apply_stream(state: &mut SessionState, event: &StreamEvent, prefs: RouterPrefs) -> Applied {
    match event {
        StreamEvent::TextDelta { content } => append_nonempty(state, content, LineKind::Text),
        StreamEvent::ThinkingStart { content } => match content {
            Some(content) if prefs.show_thinking => {
                append_nonempty(state, content, LineKind::Thinking)
            }
            _ => Applied::unchanged(),
        },
        StreamEvent::ThinkingDelta { content } if prefs.show_thinking => {
            append_nonempty(state, content, LineKind::Thinking)
        }
        StreamEvent::ThinkingDelta { .. } => Applied::unchanged(),
        StreamEvent::ToolStart { tool_id, tool_name } => {
            tool_started(state, tool_id.as_deref(), tool_name)
        }
        StreamEvent::ToolResult {
            tool_id,
            tool_name,
            success,
            error,
        } => tool_finished(state, tool_id.as_deref(), tool_name, *success, error.as_deref()),
        StreamEvent::Error { message } => fail(state, message),
        StreamEvent::Complete { usage, .. } => complete(state, *usage),
    }
}

fn apply_session(state: &mut SessionState, update: &SessionUpdate) -> Applied {
    match update {
        SessionUpdate::Failed { message } => {
            fail(state, message.as_deref().unwrap_or("Session failed"))
        }
        SessionUpdate::Cancelled { message } => {
            cancel(state, message.as_deref().unwrap_or("Session cancelled"))
        }
        SessionUpdate::Completed => match (&state.task_id, state.status) {
            (Some(task_id), SessionStatus::Running) => Applied {
                changed: false,
                effects: vec![Effect::ScheduleFinalize {
                    task_id: task_id.clone(),
                }],
            },
            _ => Applied::unchanged(),
        },
    }
}

fn append_nonempty(state: &mut SessionState, content: &str, kind: LineKind) -> Applied {
    if content.is_empty() {
        return Applied::unchanged();
    }
    state.append(content, kind);
    Applied::changed()
}

fn tool_started(state: &mut SessionState, tool_id: Option<&str>, tool_name: &str) -> Applied {
    if !state.tool_filter.admit_start(tool_id) {
        return Applied::unchanged();
    }
    state.append(format!("[tool] {} started", tool_name), LineKind::Tool);
    Applied::changed()
}

fn tool_finished(
    state: &mut SessionState,
    tool_id: Option<&str>,
    tool_name: &str,
    success: bool,
    error: Option<&str>,
) -> Applied {
    if !state.tool_filter.admit_result(tool_id) {
        return Applied::unchanged();
    }

    if success {
        state.append(format!("[tool] {} completed", tool_name), LineKind::Success);
    } else {
        let line = match error {
            Some(error) if !error.is_empty() => format!("[tool] {} failed: {}", tool_name, error),
            _ => format!("[tool] {} failed", tool_name),
        };
        state.append(line, LineKind::Error);
    }
    Applied::changed()
}

/// Mark the session failed with `message`
pub(crate) fn fail(state: &mut SessionState, message: &str) -> Applied {
    state.append(message, LineKind::Error);
    state.pending_turn = None;

    if state.status == SessionStatus::Failed {
        return Applied::changed();
    }
    state.status = SessionStatus::Failed;
    Applied::with_effect(Effect::Archive(SessionSummary::capture(state)))
}

/// Put the session back to idle with a warning notice.
///
/// The notice is skipped when it is already the last line, so a backend
/// confirmation of a local cancel does not repeat it.
pub(crate) fn cancel(state: &mut SessionState, notice: &str) -> Applied {
    let was_active = state.status.is_active();
    state.status = SessionStatus::Idle;
    state.pending_turn = None;

    let repeated = state
        .buffer
        .last()
        .is_some_and(|line| line.kind == LineKind::Warning && line.content == notice);
    if !repeated {
        state.append(notice, LineKind::Warning);
    }

    if !was_active {
        return Applied::changed();
    }
    Applied::with_effect(Effect::Archive(SessionSummary::capture(state)))
}

/// Settle a running or paused session after the backend finished.
///
/// A completion for a session that already settled (cancelled, failed, or
/// finalized by the fallback timer) is ignored.
pub(crate) fn complete(state: &mut SessionState, usage: Option<TokenUsage>) -> Applied {
    if !state.status.is_active() {
        return Applied::unchanged();
    }

    if let Some(usage) = usage {
        state.record_usage(usage);
    }

    state.close_pending_turn();
    if state.is_chat_session {
        state.append("Response complete", LineKind::Success);
    } else {
        state.append("Task completed", LineKind::Success);
    }
    state.status = SessionStatus::after_completion(state.is_chat_session);

    Applied::with_effect(Effect::Archive(SessionSummary::capture(state)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(task_id: &str) -> SessionState {
        let mut state = SessionState::idle(100);
        state.task_id = Some(task_id.to_string());
        state.status = SessionStatus::Running;
        state
    }

    fn contents(state: &SessionState) -> Vec<String> {
        state.buffer().lines().map(|l| l.content.clone()).collect()
    }

    fn stream(event: StreamEvent) -> EventKind {
        EventKind::Stream(event)
    }

    #[test]
    fn test_text_deltas_merge_and_empty_is_ignored() {
        let mut state = running("t");
        let prefs = RouterPrefs::default();

        apply_event(&mut state, &stream(StreamEvent::TextDelta { content: "Hel".into() }), prefs);
        let applied = apply_event(
            &mut state,
            &stream(StreamEvent::TextDelta { content: String::new() }),
            prefs,
        );
        apply_event(&mut state, &stream(StreamEvent::TextDelta { content: "lo".into() }), prefs);

        assert!(!applied.changed);
        assert_eq!(contents(&state), vec!["Hello"]);
    }

    #[test]
    fn test_thinking_respects_preference() {
        let mut state = running("t");
        let delta = stream(StreamEvent::ThinkingDelta {
            content: "hmm".into(),
        });

        let hidden = apply_event(&mut state, &delta, RouterPrefs { show_thinking: false });
        assert!(!hidden.changed);
        assert!(state.buffer().is_empty());

        apply_event(&mut state, &delta, RouterPrefs { show_thinking: true });
        assert_eq!(state.buffer().last().unwrap().kind, LineKind::Thinking);
    }

    #[test]
    fn test_tool_lines_are_deduplicated_across_channels() {
        let mut state = running("t");
        let prefs = RouterPrefs::default();

        apply_event(
            &mut state,
            &stream(StreamEvent::ToolStart {
                tool_id: Some("call-1".into()),
                tool_name: "Read".into(),
            }),
            prefs,
        );
        apply_event(
            &mut state,
            &EventKind::Tool(ToolUpdate::Started {
                execution_id: "call-1".into(),
                tool_name: "Read".into(),
            }),
            prefs,
        );
        apply_event(
            &mut state,
            &EventKind::Tool(ToolUpdate::Completed {
                execution_id: "call-1".into(),
                tool_name: "Read".into(),
                success: false,
                error: Some("not found".into()),
            }),
            prefs,
        );
        apply_event(
            &mut state,
            &stream(StreamEvent::ToolResult {
                tool_id: Some("call-1".into()),
                tool_name: "Read".into(),
                success: false,
                error: Some("not found".into()),
            }),
            prefs,
        );

        assert_eq!(
            contents(&state),
            vec!["[tool] Read started", "[tool] Read failed: not found"]
        );
    }

    #[test]
    fn test_error_fails_and_archives() {
        let mut state = running("t");
        let applied = apply_event(
            &mut state,
            &stream(StreamEvent::Error {
                message: "rate limited".into(),
            }),
            RouterPrefs::default(),
        );

        assert_eq!(state.status(), SessionStatus::Failed);
        assert!(matches!(applied.effects.as_slice(), [Effect::Archive(s)] if s.status == SessionStatus::Failed));
    }

    #[test]
    fn test_complete_records_usage_and_is_idempotent() {
        let mut state = running("t");
        let event = stream(StreamEvent::Complete {
            result: None,
            usage: Some(TokenUsage::new(100, 20)),
        });

        let first = apply_event(&mut state, &event, RouterPrefs::default());
        let second = apply_event(&mut state, &event, RouterPrefs::default());

        assert_eq!(state.status(), SessionStatus::Completed);
        assert_eq!(state.cumulative_usage(), Some(TokenUsage::new(100, 20)));
        assert_eq!(first.effects.len(), 1);
        assert!(!second.changed);
        assert_eq!(contents(&state), vec!["Task completed"]);
    }

    #[test]
    fn test_chat_completion_returns_to_idle() {
        let mut state = running("t");
        state.is_chat_session = true;

        complete(&mut state, None);
        assert_eq!(state.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_session_completed_schedules_fallback() {
        let mut state = running("t-9");
        let applied = apply_event(
            &mut state,
            &EventKind::Session(SessionUpdate::Completed),
            RouterPrefs::default(),
        );

        assert!(!applied.changed);
        assert!(matches!(
            applied.effects.as_slice(),
            [Effect::ScheduleFinalize { task_id }] if task_id == "t-9"
        ));
    }

    #[test]
    fn test_session_cancelled_goes_idle() {
        let mut state = running("t");
        let applied = apply_event(
            &mut state,
            &EventKind::Session(SessionUpdate::Cancelled { message: None }),
            RouterPrefs::default(),
        );

        assert_eq!(state.status(), SessionStatus::Idle);
        assert_eq!(state.buffer().last().unwrap().kind, LineKind::Warning);
        assert_eq!(applied.effects.len(), 1);
    }

    #[test]
    fn test_cancelled_event_on_settled_session_still_warns() {
        let mut state = running("t");
        complete(&mut state, None);
        assert_eq!(state.status(), SessionStatus::Completed);
        let before = state.buffer().len();

        let applied = apply_event(
            &mut state,
            &EventKind::Session(SessionUpdate::Cancelled { message: None }),
            RouterPrefs::default(),
        );

        assert!(applied.changed);
        assert!(applied.effects.is_empty());
        assert_eq!(state.status(), SessionStatus::Idle);
        assert_eq!(state.buffer().len(), before + 1);
        let last = state.buffer().last().unwrap();
        assert_eq!(last.kind, LineKind::Warning);
        assert_eq!(last.content, "Session cancelled");
    }

    #[test]
    fn test_repeated_cancel_notice_is_not_duplicated() {
        let mut state = running("t");
        cancel(&mut state, "Session cancelled");
        let before = state.buffer().len();

        cancel(&mut state, "Session cancelled");
        assert_eq!(state.buffer().len(), before);
    }
}
