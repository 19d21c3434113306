//! Inbound event subscriptions

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::events::Channel;

/// Callback invoked by a transport for every raw payload on a channel
pub type EventSink = Arc<dyn Fn(Value) + Send + Sync>;

/// Handle that detaches a channel listener when called
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// Handle that does nothing when called
    pub fn noop() -> Self {
        Self(None)
    }

    /// Detach the listener. Dropping the handle without calling this leaves
    /// the listener attached.
    pub fn call(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("armed", &self.0.is_some())
            .finish()
    }
}

/// Source of backend events, one listener per channel
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Attach `sink` to `channel`. Resolves once the backend acknowledged the
    /// subscription; the returned handle detaches it.
    async fn listen(&self, channel: Channel, sink: EventSink) -> Result<Unsubscribe>;
}
