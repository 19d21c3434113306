//! Per-session state shared by the foreground slot and background snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

use taskmux_protocol::{ConversationTurn, TokenUsage};

use super::status::SessionStatus;
use super::tool_filter::ToolCallFilter;
use crate::buffer::{LineKind, StreamBuffer};
use crate::provider::ProviderBinding;

/// Identifies an in-flight start request.
///
/// The start call's result is applied to whichever session holds the ticket
/// when the call returns, so a session backgrounded mid-launch still gets
/// its correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaunchTicket(pub u64);

impl std::fmt::Display for LaunchTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "launch-{}", self.0)
    }
}

/// A chat message waiting for its reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub user: String,
    /// Line counter when the message was sent; the reply is every text line
    /// created after it
    pub after_line: u64,
}

/// Everything one session carries, whether it sits in the foreground or in
/// the background registry
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub(crate) task_description: String,
    pub(crate) status: SessionStatus,
    pub(crate) buffer: StreamBuffer,
    pub(crate) task_id: Option<String>,
    pub(crate) is_chat_session: bool,
    pub(crate) conversation_turns: Vec<ConversationTurn>,
    pub(crate) standalone_conversation_id: Option<String>,
    pub(crate) latest_usage: Option<TokenUsage>,
    pub(crate) cumulative_usage: Option<TokenUsage>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) binding: ProviderBinding,
    pub(crate) tool_filter: ToolCallFilter,
    pub(crate) pending_turn: Option<PendingTurn>,
    pub(crate) launch_ticket: Option<LaunchTicket>,
}

impl SessionState {
    /// Blank idle session
    pub fn idle(buffer_capacity: usize) -> Self {
        Self {
            task_description: String::new(),
            status: SessionStatus::Idle,
            buffer: StreamBuffer::new(buffer_capacity),
            task_id: None,
            is_chat_session: false,
            conversation_turns: Vec::new(),
            standalone_conversation_id: None,
            latest_usage: None,
            cumulative_usage: None,
            started_at: None,
            binding: ProviderBinding::default(),
            tool_filter: ToolCallFilter::new(),
            pending_turn: None,
            launch_ticket: None,
        }
    }

    pub fn task_description(&self) -> &str {
        &self.task_description
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn buffer(&self) -> &StreamBuffer {
        &self.buffer
    }

    /// Backend correlation id, once the start call returned
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn is_chat_session(&self) -> bool {
        self.is_chat_session
    }

    pub fn conversation_turns(&self) -> &[ConversationTurn] {
        &self.conversation_turns
    }

    pub fn standalone_conversation_id(&self) -> Option<&str> {
        self.standalone_conversation_id.as_deref()
    }

    /// Usage reported by the most recent completion
    pub fn latest_usage(&self) -> Option<TokenUsage> {
        self.latest_usage
    }

    /// Usage summed over every completion of this session
    pub fn cumulative_usage(&self) -> Option<TokenUsage> {
        self.cumulative_usage
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn binding(&self) -> &ProviderBinding {
        &self.binding
    }

    pub fn launch_ticket(&self) -> Option<LaunchTicket> {
        self.launch_ticket
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.pending_turn.is_some()
    }

    /// Nothing was ever started or written here
    pub fn is_pristine(&self) -> bool {
        self.status == SessionStatus::Idle
            && self.task_id.is_none()
            && self.launch_ticket.is_none()
            && self.task_description.is_empty()
            && self.buffer.line_counter() == 0
            && self.conversation_turns.is_empty()
    }

    pub(crate) fn append(&mut self, content: impl Into<String>, kind: LineKind) -> u64 {
        self.buffer.append(content, kind)
    }

    /// Record a completion's usage report
    pub(crate) fn record_usage(&mut self, usage: TokenUsage) {
        self.latest_usage = Some(usage);
        self.cumulative_usage = Some(match self.cumulative_usage {
            Some(total) => total.accumulate(usage),
            None => usage,
        });
    }

    /// Turn the pending chat message into a conversation turn, using the
    /// text streamed since it was sent as the reply
    pub(crate) fn close_pending_turn(&mut self) {
        let Some(pending) = self.pending_turn.take() else {
            return;
        };

        let assistant: String = self
            .buffer
            .since(pending.after_line)
            .filter(|line| line.kind == LineKind::Text)
            .map(|line| line.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        self.conversation_turns.push(ConversationTurn {
            user: pending.user,
            assistant,
            created_at: Utc::now(),
        });
    }
}

/// A backgrounded session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub(crate) id: String,
    pub(crate) parent_session_id: Option<String>,
    pub(crate) state: SessionState,
}

impl SessionSnapshot {
    pub(crate) fn new(id: String, parent_session_id: Option<String>, state: SessionState) -> Self {
        Self {
            id,
            parent_session_id,
            state,
        }
    }

    /// Registry key; unrelated to the backend correlation id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Key of the session this one was forked from
    pub fn parent_session_id(&self) -> Option<&str> {
        self.parent_session_id.as_deref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }
}

impl Deref for SessionSnapshot {
    type Target = SessionState;

    fn deref(&self) -> &SessionState {
        &self.state
    }
}

/// The session currently on screen
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundSlot {
    pub(crate) state: SessionState,
    pub(crate) active_session_id: Option<String>,
}

impl ForegroundSlot {
    pub(crate) fn new(buffer_capacity: usize) -> Self {
        Self {
            state: SessionState::idle(buffer_capacity),
            active_session_id: None,
        }
    }

    /// Registry key of the session last backgrounded from or swapped with
    /// the foreground; may point at an entry that no longer exists
    pub fn active_session_id(&self) -> Option<&str> {
        self.active_session_id.as_deref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }
}

impl Deref for ForegroundSlot {
    type Target = SessionState;

    fn deref(&self) -> &SessionState {
        &self.state
    }
}
