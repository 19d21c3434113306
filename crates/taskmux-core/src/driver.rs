//! Async driver for the multiplexer
//!
//! A single task owns the [`Multiplexer`] and processes one input at a time
//! from an unbounded queue: raw channel payloads, user commands, and the
//! results of the backend calls and timers it spawned. Backend calls never
//! run on the driver task, so a slow backend cannot stall event routing.
//!
//! Observers get a [`MuxView`] over a `watch` channel whenever the
//! multiplexer's revision changes.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use taskmux_protocol::{Backend, Channel, EventSink, EventSource, TaggedEvent};

use crate::config::MuxConfig;
use crate::error::{Error, Result};
use crate::history::{HistoryStore, SessionSummary};
use crate::multiplexer::{Effect, Multiplexer, MuxView};
use crate::provider::ProviderBinding;
use crate::session::LaunchTicket;
use crate::subscription::{SetupOutcome, SubscriptionManager};

/// Result of a start command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReceipt {
    pub ticket: LaunchTicket,
    /// Registry key of the session that was moved to the background
    pub backgrounded: Option<String>,
}

/// User-facing operations, each answered on its own reply channel
#[derive(Debug)]
pub enum MuxCommand {
    Start {
        description: String,
        is_chat_session: bool,
        reply: oneshot::Sender<StartReceipt>,
    },
    SendMessage {
        content: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
    CancelBackground {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Pause {
        reply: oneshot::Sender<bool>,
    },
    Resume {
        reply: oneshot::Sender<bool>,
    },
    Background {
        reply: oneshot::Sender<Option<String>>,
    },
    SwitchTo {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Fork {
        id: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    SetShowThinking {
        show: bool,
        reply: oneshot::Sender<()>,
    },
    SetProvider {
        binding: ProviderBinding,
        reply: oneshot::Sender<()>,
    },
    View {
        reply: oneshot::Sender<MuxView>,
    },
    Shutdown,
}

/// Everything the driver task consumes
#[derive(Debug)]
pub enum MuxInput {
    /// Raw payload from one of the backend channels
    Event { channel: Channel, payload: Value },
    /// Already-parsed event
    Typed(TaggedEvent),
    Command(MuxCommand),
    StartFinished {
        ticket: LaunchTicket,
        result: std::result::Result<String, String>,
    },
    MessageFinished {
        task_id: String,
        result: std::result::Result<(), String>,
    },
    FallbackElapsed { task_id: String },
}

/// Cloneable handle for talking to a running [`MuxDriver`]
#[derive(Clone)]
pub struct MuxHandle {
    tx: mpsc::UnboundedSender<MuxInput>,
}

impl MuxHandle {
    /// Sink that forwards a channel's raw payloads to the driver
    pub fn sink(&self, channel: Channel) -> EventSink {
        let tx = self.tx.clone();
        Arc::new(move |payload| {
            if tx.send(MuxInput::Event { channel, payload }).is_err() {
                debug!("Dropping {} payload: multiplexer stopped", channel);
            }
        })
    }

    /// Listen on every backend channel through `manager`
    pub async fn subscribe(
        &self,
        manager: &SubscriptionManager,
        source: &dyn EventSource,
    ) -> Result<SetupOutcome> {
        manager.setup(source, |channel| self.sink(channel)).await
    }

    pub fn deliver(&self, channel: Channel, payload: Value) -> Result<()> {
        self.send(MuxInput::Event { channel, payload })
    }

    pub fn deliver_event(&self, event: TaggedEvent) -> Result<()> {
        self.send(MuxInput::Typed(event))
    }

    pub async fn start(&self, description: impl Into<String>) -> Result<StartReceipt> {
        let description = description.into();
        self.request(|reply| MuxCommand::Start {
            description,
            is_chat_session: false,
            reply,
        })
        .await
    }

    pub async fn start_chat(&self, message: impl Into<String>) -> Result<StartReceipt> {
        let description = message.into();
        self.request(|reply| MuxCommand::Start {
            description,
            is_chat_session: true,
            reply,
        })
        .await
    }

    pub async fn send_message(&self, content: impl Into<String>) -> Result<()> {
        let content = content.into();
        self.request(|reply| MuxCommand::SendMessage { content, reply })
            .await?
    }

    pub async fn cancel(&self) -> Result<()> {
        self.request(|reply| MuxCommand::Cancel { reply }).await
    }

    pub async fn cancel_background(&self, id: impl Into<String>) -> Result<bool> {
        let id = id.into();
        self.request(|reply| MuxCommand::CancelBackground { id, reply })
            .await
    }

    pub async fn pause(&self) -> Result<bool> {
        self.request(|reply| MuxCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<bool> {
        self.request(|reply| MuxCommand::Resume { reply }).await
    }

    pub async fn background_current(&self) -> Result<Option<String>> {
        self.request(|reply| MuxCommand::Background { reply }).await
    }

    pub async fn switch_to(&self, id: impl Into<String>) -> Result<bool> {
        let id = id.into();
        self.request(|reply| MuxCommand::SwitchTo { id, reply }).await
    }

    pub async fn remove(&self, id: impl Into<String>) -> Result<bool> {
        let id = id.into();
        self.request(|reply| MuxCommand::Remove { id, reply }).await
    }

    pub async fn fork(&self, id: impl Into<String>) -> Result<Option<String>> {
        let id = id.into();
        self.request(|reply| MuxCommand::Fork { id, reply }).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.request(|reply| MuxCommand::Reset { reply }).await
    }

    pub async fn set_show_thinking(&self, show: bool) -> Result<()> {
        self.request(|reply| MuxCommand::SetShowThinking { show, reply })
            .await
    }

    pub async fn set_provider(&self, binding: ProviderBinding) -> Result<()> {
        self.request(|reply| MuxCommand::SetProvider { binding, reply })
            .await
    }

    pub async fn view(&self) -> Result<MuxView> {
        self.request(|reply| MuxCommand::View { reply }).await
    }

    /// Stop the driver after the inputs already queued
    pub fn shutdown(&self) -> Result<()> {
        self.send(MuxInput::Command(MuxCommand::Shutdown))
    }

    fn send(&self, input: MuxInput) -> Result<()> {
        self.tx.send(input).map_err(|_| Error::ChannelClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> MuxCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(MuxInput::Command(make(reply)))?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }
}

/// Owns the multiplexer and carries out its effects
pub struct MuxDriver {
    mux: Multiplexer,
    backend: Arc<dyn Backend>,
    history: Option<Arc<dyn HistoryStore>>,
    /// Feeds the history writer while the driver runs
    archive_tx: Option<mpsc::UnboundedSender<SessionSummary>>,
    fallback_delay: Duration,
    input_rx: mpsc::UnboundedReceiver<MuxInput>,
    /// Weak so the queue closes once every handle is gone
    loopback: mpsc::WeakUnboundedSender<MuxInput>,
    view_tx: watch::Sender<MuxView>,
    published: u64,
}

impl MuxDriver {
    /// Create a driver plus a handle for sending it inputs and a receiver
    /// for observing it
    pub fn new(
        mux: Multiplexer,
        backend: Arc<dyn Backend>,
        config: &MuxConfig,
    ) -> (Self, MuxHandle, watch::Receiver<MuxView>) {
        let (tx, input_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(mux.view());

        let driver = Self {
            published: mux.revision(),
            mux,
            backend,
            history: None,
            archive_tx: None,
            fallback_delay: config.completion.fallback_delay(),
            input_rx,
            loopback: tx.downgrade(),
            view_tx,
        };

        (driver, MuxHandle { tx }, view_rx)
    }

    /// Record settled sessions into `store`
    pub fn with_history(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    /// Run on a new tokio task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process inputs until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        debug!("Multiplexer driver starting");
        self.archive_tx = self.history.clone().map(spawn_history_writer);
        while let Some(input) = self.input_rx.recv().await {
            let keep_going = self.handle(input);
            self.publish();
            if !keep_going {
                break;
            }
        }
        debug!("Multiplexer driver stopped");
    }

    fn handle(&mut self, input: MuxInput) -> bool {
        let effects = match input {
            MuxInput::Event { channel, payload } => self.mux.handle_raw(channel, &payload).effects,
            MuxInput::Typed(event) => self.mux.route(&event).effects,
            MuxInput::Command(MuxCommand::Shutdown) => return false,
            MuxInput::Command(command) => self.handle_command(command),
            MuxInput::StartFinished { ticket, result } => self.mux.complete_start(ticket, result),
            MuxInput::MessageFinished { task_id, result } => {
                self.mux.complete_follow_up(&task_id, result)
            }
            MuxInput::FallbackElapsed { task_id } => self.mux.finalize(&task_id),
        };
        self.execute(effects);
        true
    }

    fn handle_command(&mut self, command: MuxCommand) -> Vec<Effect> {
        match command {
            MuxCommand::Start {
                description,
                is_chat_session,
                reply,
            } => {
                let plan = self.mux.start(description, is_chat_session);
                let _ = reply.send(StartReceipt {
                    ticket: plan.ticket,
                    backgrounded: plan.backgrounded,
                });
                plan.effects
            }
            MuxCommand::SendMessage { content, reply } => match self.mux.send_message(content) {
                Ok(effects) => {
                    let _ = reply.send(Ok(()));
                    effects
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Vec::new()
                }
            },
            MuxCommand::Cancel { reply } => {
                let effects = self.mux.cancel();
                let _ = reply.send(());
                effects
            }
            MuxCommand::CancelBackground { id, reply } => {
                let effects = self.mux.cancel_background(&id);
                let _ = reply.send(effects.is_some());
                effects.unwrap_or_default()
            }
            MuxCommand::Pause { reply } => {
                let _ = reply.send(self.mux.pause());
                Vec::new()
            }
            MuxCommand::Resume { reply } => {
                let _ = reply.send(self.mux.resume());
                Vec::new()
            }
            MuxCommand::Background { reply } => {
                let _ = reply.send(self.mux.background_current());
                Vec::new()
            }
            MuxCommand::SwitchTo { id, reply } => {
                let _ = reply.send(self.mux.switch_to(&id));
                Vec::new()
            }
            MuxCommand::Remove { id, reply } => {
                let _ = reply.send(self.mux.remove(&id));
                Vec::new()
            }
            MuxCommand::Fork { id, reply } => {
                let _ = reply.send(self.mux.fork(&id));
                Vec::new()
            }
            MuxCommand::Reset { reply } => {
                let effects = self.mux.reset();
                let _ = reply.send(());
                effects
            }
            MuxCommand::SetShowThinking { show, reply } => {
                self.mux.set_show_thinking(show);
                let _ = reply.send(());
                Vec::new()
            }
            MuxCommand::SetProvider { binding, reply } => {
                self.mux.set_binding(binding);
                let _ = reply.send(());
                Vec::new()
            }
            MuxCommand::View { reply } => {
                let _ = reply.send(self.mux.view());
                Vec::new()
            }
            MuxCommand::Shutdown => Vec::new(),
        }
    }

    fn execute(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Archive(summary) => self.archive(summary),
                Effect::CancelSession { task_id } => {
                    let backend = self.backend.clone();
                    tokio::spawn(async move {
                        let result = backend
                            .cancel_session(&task_id)
                            .await
                            .and_then(|response| response.into_result());
                        if let Err(e) = result {
                            warn!("Failed to cancel {}: {}", task_id, e);
                        }
                    });
                }
                Effect::StartSession { ticket, request } => {
                    let Some(tx) = self.loopback.upgrade() else {
                        continue;
                    };
                    let backend = self.backend.clone();
                    tokio::spawn(async move {
                        let result = backend
                            .start_session(request)
                            .await
                            .and_then(|response| response.into_data())
                            .map(|started| started.session_id)
                            .map_err(|e| {
                                warn!("Failed to start {}: {}", ticket, e);
                                e.to_string()
                            });
                        let _ = tx.send(MuxInput::StartFinished { ticket, result });
                    });
                }
                Effect::SendMessage { task_id, request } => {
                    let Some(tx) = self.loopback.upgrade() else {
                        continue;
                    };
                    let backend = self.backend.clone();
                    tokio::spawn(async move {
                        let result = backend
                            .send_message(request)
                            .await
                            .and_then(|response| response.into_result())
                            .map(|_| ())
                            .map_err(|e| {
                                warn!("Failed to send message to {}: {}", task_id, e);
                                e.to_string()
                            });
                        let _ = tx.send(MuxInput::MessageFinished { task_id, result });
                    });
                }
                Effect::ScheduleFinalize { task_id } => {
                    let Some(tx) = self.loopback.upgrade() else {
                        continue;
                    };
                    let delay = self.fallback_delay;
                    debug!("Finalizing {} in {:?} unless it completes", task_id, delay);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(MuxInput::FallbackElapsed { task_id });
                    });
                }
            }
        }
    }

    fn archive(&self, summary: SessionSummary) {
        if let Some(tx) = &self.archive_tx {
            let _ = tx.send(summary);
        }
    }

    fn publish(&mut self) {
        let revision = self.mux.revision();
        if revision != self.published {
            self.published = revision;
            self.view_tx.send_replace(self.mux.view());
        }
    }
}

/// History stores do file I/O, so records are written in order on a
/// blocking thread. The writer stops once the driver drops its sender.
fn spawn_history_writer(store: Arc<dyn HistoryStore>) -> mpsc::UnboundedSender<SessionSummary> {
    let (tx, mut rx) = mpsc::unbounded_channel::<SessionSummary>();
    tokio::task::spawn_blocking(move || {
        while let Some(summary) = rx.blocking_recv() {
            let id = summary.id.clone();
            if let Err(e) = store.record(summary) {
                warn!("Failed to record session {} in history: {}", id, e);
            }
        }
    });
    tx
}
