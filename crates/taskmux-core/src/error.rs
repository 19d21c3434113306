//! Error types for taskmux core

use thiserror::Error;

use taskmux_protocol::ProtocolError;

/// Result type alias using taskmux Error
pub type Result<T> = std::result::Result<T, Error>;

/// Taskmux error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("History error: {0}")]
    History(String),

    /// The multiplexer driver has shut down
    #[error("Multiplexer channel closed")]
    ChannelClosed,

    #[error("No foreground session to {0}")]
    NoForegroundSession(&'static str),

    /// The foreground session is still working on the previous message
    #[error("Session is busy")]
    SessionBusy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
