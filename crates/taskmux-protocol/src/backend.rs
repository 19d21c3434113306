//! Outbound backend calls

use async_trait::async_trait;

use crate::error::Result;
use crate::rpc::{FollowUpRequest, RpcResponse, StartRequest, StartedSession};

/// Backend that runs sessions on the client's behalf.
///
/// `Err` means the call itself failed (transport); an `Ok` envelope with
/// `success: false` means the backend rejected it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Start a session and return its correlation id
    async fn start_session(&self, request: StartRequest) -> Result<RpcResponse<StartedSession>>;

    /// Send a follow-up message to a chat session
    async fn send_message(&self, request: FollowUpRequest)
    -> Result<RpcResponse<serde_json::Value>>;

    /// Ask the backend to stop a session. Best-effort: callers do not wait
    /// for the session to actually stop.
    async fn cancel_session(&self, session_id: &str) -> Result<RpcResponse<serde_json::Value>>;
}
