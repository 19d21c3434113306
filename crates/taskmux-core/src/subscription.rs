//! Event channel subscriptions
//!
//! Listening on the three backend channels is asynchronous, and a setup can
//! be overtaken by a cleanup or by a newer setup before it finishes. Every
//! setup takes a generation number; handles acquired for a generation that
//! is no longer current are released as soon as they arrive, so the
//! multiplexer never ends up with two live sets of listeners.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use taskmux_protocol::{Channel, EventSink, EventSource, Unsubscribe};

use crate::error::Result;

/// How a [`SubscriptionManager::setup`] call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Listeners for this generation are live
    Active { generation: u64 },
    /// A cleanup or a newer setup ran first; the handles were released
    Superseded { generation: u64 },
}

#[derive(Default)]
pub struct SubscriptionManager {
    generation: AtomicU64,
    active: Mutex<Vec<(u64, Unsubscribe)>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of live unsubscribe handles
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Listen on every channel, feeding each into the sink `make_sink`
    /// returns for it.
    ///
    /// If any channel fails, the ones already acquired are released and the
    /// error is returned.
    pub async fn setup<F>(&self, source: &dyn EventSource, make_sink: F) -> Result<SetupOutcome>
    where
        F: Fn(Channel) -> EventSink,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Subscribing to backend channels (generation {})", generation);

        let results = join_all(
            Channel::ALL
                .iter()
                .map(|&channel| source.listen(channel, make_sink(channel))),
        )
        .await;

        let mut handles = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(handle) => handles.push(handle),
                Err(e) if failure.is_none() => failure = Some(e),
                Err(e) => warn!("Additional subscription failure: {}", e),
            }
        }

        if let Some(error) = failure {
            handles.into_iter().for_each(Unsubscribe::call);
            return Err(error.into());
        }

        // checked under the lock cleanup bumps the generation under
        let (outcome, release) = {
            let mut active = self.active.lock();
            if self.generation() != generation {
                (SetupOutcome::Superseded { generation }, handles)
            } else {
                let (current, stale): (Vec<_>, Vec<_>) =
                    active.drain(..).partition(|(g, _)| *g >= generation);
                *active = current;
                active.extend(handles.into_iter().map(|handle| (generation, handle)));
                let stale = stale.into_iter().map(|(_, handle)| handle).collect();
                (SetupOutcome::Active { generation }, stale)
            }
        };

        if let SetupOutcome::Superseded { .. } = outcome {
            debug!("Subscription generation {} superseded", generation);
        }
        release.into_iter().for_each(Unsubscribe::call);

        Ok(outcome)
    }

    /// Release every listener and invalidate any setup still in flight
    pub fn cleanup(&self) {
        let handles: Vec<(u64, Unsubscribe)> = {
            let mut active = self.active.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            active.drain(..).collect()
        };
        if !handles.is_empty() {
            debug!("Unsubscribing {} channel listeners", handles.len());
        }
        for (_, handle) in handles {
            handle.call();
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}
