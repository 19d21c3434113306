//! Outbound RPC shapes
//!
//! Every backend call answers with the same `{ success, data, error }`
//! envelope. The multiplexer only looks at `success`, `error` and the
//! correlation id returned when a session starts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Response envelope shared by all backend calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> RpcResponse<T> {
    /// Successful response carrying `data`
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Successful response without a payload
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    /// Failed response with a human-readable message
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Convert the envelope into a `Result`, keeping the optional payload
    pub fn into_result(self) -> Result<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ProtocolError::Rpc(
                self.error
                    .unwrap_or_else(|| "backend call failed".to_string()),
            ))
        }
    }

    /// Like [`into_result`](Self::into_result) but a missing payload is an error
    pub fn into_data(self) -> Result<T> {
        self.into_result()?
            .ok_or_else(|| ProtocolError::Rpc("backend returned no data".to_string()))
    }
}

/// Request to start a new backend session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub task_description: String,
    pub llm_backend: String,
    pub llm_provider: String,
    pub llm_model: String,
    /// Chat sessions stay open for follow-up messages after completing a turn
    pub is_chat_session: bool,
    /// Prior exchanges to seed the session with, e.g. when continuing a fork
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_turns: Vec<ConversationTurn>,
}

/// Payload returned when a session starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedSession {
    /// Correlation id the backend will tag this session's events with
    #[serde(alias = "task_id", alias = "id")]
    pub session_id: String,
}

/// One exchange in a chat session, replayed to providers without native
/// multi-turn memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
    pub created_at: DateTime<Utc>,
}

/// Follow-up message for a running chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpRequest {
    pub session_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_turns: Vec<ConversationTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standalone_conversation_id: Option<String>,
}
