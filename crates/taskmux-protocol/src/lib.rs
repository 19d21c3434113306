//! Taskmux Protocol - the boundary between the multiplexer and the task backend
//!
//! The backend talks to the client over a handful of event channels, each
//! event carrying only an opaque `session_id`. This crate owns:
//! - Channel names and the defensive parsing of their untyped JSON payloads
//! - Typed per-channel events produced by that parsing
//! - The `{ success, data, error }` RPC envelope and request shapes
//! - `Backend` and `EventSource` traits implemented by transports

pub mod backend;
pub mod events;
pub mod rpc;
pub mod source;

mod error;

pub use backend::Backend;
pub use error::{ProtocolError, Result};
pub use events::{
    parse_event, Channel, EventKind, SessionUpdate, StreamEvent, TaggedEvent, TokenUsage,
    ToolUpdate,
};
pub use rpc::{ConversationTurn, FollowUpRequest, RpcResponse, StartRequest, StartedSession};
pub use source::{EventSink, EventSource, Unsubscribe};
