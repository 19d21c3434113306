//! Error types for the backend protocol

use thiserror::Error;

/// Result type alias using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised at the backend boundary
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The backend answered with `success: false`
    #[error("Backend call failed: {0}")]
    Rpc(String),

    /// The call never reached the backend or its answer was lost
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Subscription to {channel} failed: {message}")]
    Subscription { channel: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
