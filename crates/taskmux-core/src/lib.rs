//! Taskmux Core - foreground/background session multiplexing
//!
//! Lets a user keep several AI task sessions going at once while looking at
//! one of them. This crate provides:
//! - The multiplexer: one foreground slot plus a registry of background
//!   snapshots, with background/switch/fork/remove operations
//! - Event routing from the shared backend channels to the owning session
//! - Bounded, merge-aware stream buffers per session
//! - Subscription lifetime management for the event channels
//! - An async driver that runs backend calls and timers off the routing path
//! - Configuration and session history persistence

pub mod buffer;
pub mod config;
pub mod driver;
pub mod error;
pub mod history;
pub mod multiplexer;
pub mod provider;
pub mod router;
pub mod session;
pub mod subscription;

pub use buffer::{LineKind, StreamBuffer, StreamLine};
pub use config::{ConfigManager, MuxConfig};
pub use driver::{MuxCommand, MuxDriver, MuxHandle, MuxInput, StartReceipt};
pub use error::{Error, Result};
pub use history::{HistoryStore, JsonHistoryStore, MemoryHistoryStore, SessionSummary};
pub use multiplexer::{Effect, Multiplexer, MuxView, Routed, StartPlan, Target};
pub use provider::{ProviderBinding, SharedProviderSelection, resolve_binding, shared_selection};
pub use router::RouterPrefs;
pub use subscription::{SetupOutcome, SubscriptionManager};

// Session exports
pub use session::{
    BackgroundRegistry, ForegroundSlot, ForkForest, LaunchTicket, SessionSnapshot, SessionState,
    SessionStatus, ToolCallFilter, build_forest,
};
