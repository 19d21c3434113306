//! Session model
//!
//! The foreground slot, background snapshots and the registry that holds
//! them.

pub mod forest;
pub mod registry;
pub mod state;
pub mod status;
pub mod tool_filter;

pub use forest::{ForkForest, build_forest};
pub use registry::BackgroundRegistry;
pub use state::{ForegroundSlot, LaunchTicket, PendingTurn, SessionSnapshot, SessionState};
pub use status::SessionStatus;
pub use tool_filter::ToolCallFilter;
