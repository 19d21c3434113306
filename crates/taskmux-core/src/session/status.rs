//! Session lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle of a session.
///
/// `idle → running → {paused, failed, completed}`, `paused → running`, and
/// `completed`/`failed` go back to `running` only through a fresh start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Work in progress that must not be discarded when a new task starts
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Paused)
    }

    /// State a session settles in after the backend reports completion.
    /// Chat sessions go back to idle, ready for the next message.
    pub fn after_completion(is_chat_session: bool) -> Self {
        if is_chat_session {
            SessionStatus::Idle
        } else {
            SessionStatus::Completed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
