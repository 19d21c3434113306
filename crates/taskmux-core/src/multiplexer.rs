//! Session multiplexer
//!
//! Owns the foreground slot and the background registry. Every operation is
//! synchronous and runs to completion before the next one starts; anything
//! that has to leave the process (backend calls, timers, history writes) is
//! returned as an [`Effect`] for the caller to carry out.
//!
//! Events are matched to sessions by backend correlation id. The foreground
//! is checked first, then the registry; events for unknown ids are dropped.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskmux_protocol::{Channel, FollowUpRequest, StartRequest, TaggedEvent, parse_event};

use crate::buffer::LineKind;
use crate::config::MuxConfig;
use crate::error::{Error, Result};
use crate::history::SessionSummary;
use crate::provider::{ProviderBinding, SharedProviderSelection, shared_selection};
use crate::router::{self, Applied, RouterPrefs};
use crate::session::{
    BackgroundRegistry, ForegroundSlot, ForkForest, LaunchTicket, PendingTurn, SessionSnapshot,
    SessionState, SessionStatus,
};

/// Work the multiplexer needs done outside of itself
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Call the backend's start RPC; report back with the same ticket
    StartSession {
        ticket: LaunchTicket,
        request: StartRequest,
    },
    /// Send a follow-up message to a running backend session
    SendMessage {
        task_id: String,
        request: FollowUpRequest,
    },
    /// Best-effort request for the backend to stop a session
    CancelSession { task_id: String },
    /// Finalize `task_id` locally if its `complete` event does not arrive
    /// within the fallback delay
    ScheduleFinalize { task_id: String },
    /// Persist a summary of a session that reached a resting state
    Archive(SessionSummary),
}

/// Where a routed event landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Foreground,
    /// Registry key of the background session
    Background(String),
}

/// Outcome of routing one event
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    /// `None` when the event was dropped
    pub target: Option<Target>,
    pub effects: Vec<Effect>,
}

impl Routed {
    fn dropped() -> Self {
        Self {
            target: None,
            effects: Vec::new(),
        }
    }
}

/// Outcome of [`Multiplexer::start`]
#[derive(Debug, Clone, PartialEq)]
pub struct StartPlan {
    pub ticket: LaunchTicket,
    /// Registry key of the session that was moved out of the way
    pub backgrounded: Option<String>,
    pub effects: Vec<Effect>,
}

/// Read-only copy of the multiplexer for observers
#[derive(Debug, Clone)]
pub struct MuxView {
    pub revision: u64,
    pub foreground: ForegroundSlot,
    pub registry: BackgroundRegistry,
    pub binding: ProviderBinding,
    pub show_thinking: bool,
}

impl MuxView {
    /// Registry entry the active pointer refers to, if it still exists
    pub fn highlighted(&self) -> Option<&Arc<SessionSnapshot>> {
        let id = self.foreground.active_session_id()?;
        self.registry.get(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Foreground,
    Background(usize),
}

pub struct Multiplexer {
    foreground: ForegroundSlot,
    registry: BackgroundRegistry,
    selection: SharedProviderSelection,
    prefs: RouterPrefs,
    buffer_capacity: usize,
    next_ticket: u64,
    revision: u64,
}

impl Multiplexer {
    pub fn new(config: &MuxConfig, selection: SharedProviderSelection) -> Self {
        let buffer_capacity = config.buffer.capacity.max(1);
        Self {
            foreground: ForegroundSlot::new(buffer_capacity),
            registry: BackgroundRegistry::new(),
            selection,
            prefs: RouterPrefs {
                show_thinking: config.display.show_thinking,
            },
            buffer_capacity,
            next_ticket: 0,
            revision: 0,
        }
    }

    /// Multiplexer with its own provider selection seeded from the config
    pub fn from_config(config: &MuxConfig) -> Self {
        Self::new(config, shared_selection(config.provider.binding()))
    }

    pub fn foreground(&self) -> &ForegroundSlot {
        &self.foreground
    }

    pub fn registry(&self) -> &BackgroundRegistry {
        &self.registry
    }

    pub fn selection(&self) -> &SharedProviderSelection {
        &self.selection
    }

    /// Current process-wide provider selection
    pub fn binding(&self) -> ProviderBinding {
        self.selection.read().clone()
    }

    /// Bumped on every observable change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn show_thinking(&self) -> bool {
        self.prefs.show_thinking
    }

    /// Registry entry the active pointer refers to, if it still exists
    pub fn highlighted(&self) -> Option<&Arc<SessionSnapshot>> {
        let id = self.foreground.active_session_id()?;
        self.registry.get(id)
    }

    pub fn forest(&self) -> ForkForest {
        self.registry.forest()
    }

    pub fn view(&self) -> MuxView {
        MuxView {
            revision: self.revision,
            foreground: self.foreground.clone(),
            registry: self.registry.clone(),
            binding: self.binding(),
            show_thinking: self.prefs.show_thinking,
        }
    }

    // ------------------------------------------------------------------
    // Session switching
    // ------------------------------------------------------------------

    /// Move the foreground session into the registry and leave a blank idle
    /// foreground. Returns the new registry key, or `None` when there was
    /// nothing to move.
    pub fn background_current(&mut self) -> Option<String> {
        if self.foreground.state.is_pristine() {
            debug!("Nothing to background");
            return None;
        }

        let state = std::mem::replace(
            &mut self.foreground.state,
            SessionState::idle(self.buffer_capacity),
        );
        let key = self.stash(state);
        self.foreground.active_session_id = Some(key.clone());
        self.touch();
        Some(key)
    }

    /// Swap registry entry `id` into the foreground.
    ///
    /// The previous foreground takes its place in the registry under a new
    /// key (a blank foreground is simply dropped), and the restored
    /// session's provider binding becomes the process-wide selection.
    pub fn switch_to(&mut self, id: &str) -> bool {
        let Some((remaining, target)) = self.registry.without(id) else {
            debug!("Cannot switch to unknown session {}", id);
            return false;
        };
        self.registry = remaining;

        let restored =
            Arc::try_unwrap(target).unwrap_or_else(|shared| SessionSnapshot::clone(&shared));
        let previous = std::mem::replace(&mut self.foreground.state, restored.state);

        self.foreground.active_session_id = if previous.is_pristine() {
            None
        } else {
            Some(self.stash(previous))
        };

        *self.selection.write() = self.foreground.state.binding.clone();
        info!("Switched to session {} ({})", id, self.foreground.state.status);
        self.touch();
        true
    }

    /// Delete a registry entry. The active pointer is left alone.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some((remaining, removed)) = self.registry.without(id) else {
            return false;
        };
        if removed.state.status.is_active() {
            warn!("Removed session {} while it was still {}", id, removed.state.status);
        }
        self.registry = remaining;
        self.touch();
        true
    }

    /// Copy a background session into a new idle entry that remembers it
    /// as its parent. The copy has no backend session of its own; its first
    /// message starts one seeded with the copied conversation.
    pub fn fork(&mut self, id: &str) -> Option<String> {
        let source = self.registry.get(id)?;

        let mut state = SessionState::idle(self.buffer_capacity);
        state.task_description = source.state.task_description.clone();
        state.buffer = source.state.buffer.clone();
        state.is_chat_session = true;
        state.conversation_turns = source.state.conversation_turns.clone();
        state.binding = source.state.binding.clone();
        state.tool_filter = source.state.tool_filter.clone();

        let key = Uuid::new_v4().to_string();
        info!("Forked session {} into {}", id, key);
        self.registry = self.registry.with_inserted(SessionSnapshot::new(
            key.clone(),
            Some(id.to_string()),
            state,
        ));
        self.touch();
        Some(key)
    }

    fn stash(&mut self, mut state: SessionState) -> String {
        state.binding = self.binding();
        let key = Uuid::new_v4().to_string();
        info!("Backgrounded session {} ({})", key, state.status);
        self.registry = self
            .registry
            .with_inserted(SessionSnapshot::new(key.clone(), None, state));
        key
    }

    // ------------------------------------------------------------------
    // Foreground lifecycle
    // ------------------------------------------------------------------

    /// Start a new task in the foreground.
    ///
    /// A running or paused foreground is backgrounded first; anything else
    /// is replaced (it was archived when it settled).
    pub fn start(&mut self, description: impl Into<String>, is_chat_session: bool) -> StartPlan {
        let description = description.into();
        let backgrounded = if self.foreground.state.status.is_active() {
            self.background_current()
        } else {
            None
        };

        let ticket = self.issue_ticket();
        let binding = self.binding();

        let mut state = SessionState::idle(self.buffer_capacity);
        state.task_description = description.clone();
        state.status = SessionStatus::Running;
        state.is_chat_session = is_chat_session;
        state.started_at = Some(chrono::Utc::now());
        state.binding = binding.clone();
        state.launch_ticket = Some(ticket);
        if is_chat_session {
            state.append(format!("> {}", description), LineKind::Info);
            state.pending_turn = Some(PendingTurn {
                user: description.clone(),
                after_line: state.buffer.line_counter(),
            });
        } else {
            state.append(format!("Starting task: {}", description), LineKind::Info);
        }
        self.foreground.state = state;
        self.touch();

        info!("Starting {} ({})", if is_chat_session { "chat" } else { "task" }, ticket);
        StartPlan {
            ticket,
            backgrounded,
            effects: vec![Effect::StartSession {
                ticket,
                request: StartRequest {
                    task_description: description,
                    llm_backend: binding.backend,
                    llm_provider: binding.provider,
                    llm_model: binding.model,
                    is_chat_session,
                    conversation_turns: Vec::new(),
                },
            }],
        }
    }

    /// Apply the start RPC's result to whichever session holds `ticket`
    pub fn complete_start(
        &mut self,
        ticket: LaunchTicket,
        result: std::result::Result<String, String>,
    ) -> Vec<Effect> {
        let Some(slot) = self.locate_ticket(ticket) else {
            debug!("Session for {} is gone", ticket);
            // nobody will ever watch this backend session
            return match result {
                Ok(task_id) => vec![Effect::CancelSession { task_id }],
                Err(_) => Vec::new(),
            };
        };

        self.apply(slot, |state| {
            state.launch_ticket = None;
            match result {
                Ok(task_id) => {
                    info!("{} started as {}", ticket, task_id);
                    state.task_id = Some(task_id.clone());
                    let effects = if state.status.is_active() {
                        Vec::new()
                    } else {
                        vec![Effect::CancelSession { task_id }]
                    };
                    Applied {
                        changed: true,
                        effects,
                    }
                }
                Err(message) if state.status.is_active() => {
                    router::fail(state, &format!("Failed to start session: {}", message))
                }
                Err(message) => {
                    debug!("{} failed after the session settled: {}", ticket, message);
                    Applied {
                        changed: true,
                        effects: Vec::new(),
                    }
                }
            }
        })
    }

    /// Send a follow-up message from the foreground session
    pub fn send_message(&mut self, content: impl Into<String>) -> Result<Vec<Effect>> {
        let content = content.into();
        if self.foreground.state.status.is_active() {
            return Err(Error::SessionBusy);
        }
        if self.foreground.state.is_pristine() {
            return Err(Error::NoForegroundSession("message"));
        }

        let ticket = match self.foreground.state.task_id {
            Some(_) => None,
            None => Some(self.issue_ticket()),
        };
        let binding = self.binding();

        let state = &mut self.foreground.state;
        state.append(format!("> {}", content), LineKind::Info);
        state.pending_turn = Some(PendingTurn {
            user: content.clone(),
            after_line: state.buffer.line_counter(),
        });
        state.status = SessionStatus::Running;

        let effect = match (state.task_id.clone(), ticket) {
            (Some(task_id), _) => Effect::SendMessage {
                task_id: task_id.clone(),
                request: FollowUpRequest {
                    session_id: task_id,
                    content,
                    conversation_turns: state.conversation_turns.clone(),
                    standalone_conversation_id: state.standalone_conversation_id.clone(),
                },
            },
            (None, Some(ticket)) => {
                // no backend session yet (a fork): start one carrying the
                // conversation so far
                state.launch_ticket = Some(ticket);
                state.is_chat_session = true;
                state.binding = binding.clone();
                Effect::StartSession {
                    ticket,
                    request: StartRequest {
                        task_description: content,
                        llm_backend: binding.backend,
                        llm_provider: binding.provider,
                        llm_model: binding.model,
                        is_chat_session: true,
                        conversation_turns: state.conversation_turns.clone(),
                    },
                }
            }
            (None, None) => return Err(Error::NoForegroundSession("message")),
        };

        self.touch();
        Ok(vec![effect])
    }

    /// Apply the follow-up RPC's result
    pub fn complete_follow_up(
        &mut self,
        task_id: &str,
        result: std::result::Result<(), String>,
    ) -> Vec<Effect> {
        let Err(message) = result else {
            return Vec::new();
        };
        let Some(slot) = self.locate_task(task_id) else {
            return Vec::new();
        };

        self.apply(slot, |state| {
            if state.status.is_active() {
                router::fail(state, &format!("Failed to send message: {}", message))
            } else {
                Applied::default()
            }
        })
    }

    /// Stop the foreground session. It goes idle whatever state it was in;
    /// the backend is asked to stop if the session was still working.
    pub fn cancel(&mut self) -> Vec<Effect> {
        self.cancel_slot(Slot::Foreground)
    }

    /// Cancel a background session by registry key
    pub fn cancel_background(&mut self, id: &str) -> Option<Vec<Effect>> {
        let index = self.registry.position(id)?;
        Some(self.cancel_slot(Slot::Background(index)))
    }

    fn cancel_slot(&mut self, slot: Slot) -> Vec<Effect> {
        self.apply(slot, |state| {
            if !state.status.is_active() {
                let changed = state.status != SessionStatus::Idle || state.pending_turn.is_some();
                state.status = SessionStatus::Idle;
                state.pending_turn = None;
                return Applied {
                    changed,
                    effects: Vec::new(),
                };
            }

            let notify = state.task_id.clone();
            let mut applied = router::cancel(state, "Task cancelled");
            if let Some(task_id) = notify {
                applied.effects.push(Effect::CancelSession { task_id });
            }
            applied
        })
    }

    pub fn pause(&mut self) -> bool {
        if self.foreground.state.status != SessionStatus::Running {
            return false;
        }
        let state = &mut self.foreground.state;
        state.status = SessionStatus::Paused;
        state.append("Task paused", LineKind::Info);
        self.touch();
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.foreground.state.status != SessionStatus::Paused {
            return false;
        }
        let state = &mut self.foreground.state;
        state.status = SessionStatus::Running;
        state.append("Task resumed", LineKind::Info);
        self.touch();
        true
    }

    /// Discard the foreground session and start over with a blank one.
    /// Its transcript goes to history first.
    pub fn reset(&mut self) -> Vec<Effect> {
        if self.foreground.state.is_pristine() {
            return Vec::new();
        }

        let mut effects = Vec::new();
        let state = &self.foreground.state;
        if state.status.is_active()
            && let Some(task_id) = &state.task_id
        {
            effects.push(Effect::CancelSession {
                task_id: task_id.clone(),
            });
        }
        if !state.buffer.is_empty() {
            effects.push(Effect::Archive(SessionSummary::capture(state)));
        }

        self.foreground.state = SessionState::idle(self.buffer_capacity);
        self.touch();
        effects
    }

    /// Change the process-wide provider selection used for new backend calls
    pub fn set_binding(&mut self, binding: ProviderBinding) {
        let mut selection = self.selection.write();
        if *selection == binding {
            return;
        }
        info!(
            "Provider selection changed to {}/{}/{}",
            binding.backend, binding.provider, binding.model
        );
        *selection = binding;
        drop(selection);
        self.touch();
    }

    pub fn set_show_thinking(&mut self, show: bool) {
        if self.prefs.show_thinking != show {
            self.prefs.show_thinking = show;
            self.touch();
        }
    }

    // ------------------------------------------------------------------
    // Event routing
    // ------------------------------------------------------------------

    /// Apply a typed event to the session carrying its correlation id
    pub fn route(&mut self, event: &TaggedEvent) -> Routed {
        let Some(slot) = self.locate_task(&event.session_id) else {
            debug!("Dropping event for unknown session {}", event.session_id);
            return Routed::dropped();
        };

        let target = match slot {
            Slot::Foreground => Target::Foreground,
            Slot::Background(index) => match self.registry.at(index) {
                Some(entry) => Target::Background(entry.id.clone()),
                None => return Routed::dropped(),
            },
        };

        let prefs = self.prefs;
        let effects = self.apply(slot, |state| router::apply_event(state, &event.kind, prefs));
        Routed {
            target: Some(target),
            effects,
        }
    }

    /// Parse a raw channel payload and route it
    pub fn handle_raw(&mut self, channel: Channel, payload: &Value) -> Routed {
        match parse_event(channel, payload) {
            Some(event) => self.route(&event),
            None => {
                debug!("Ignoring unrecognized {} payload", channel);
                Routed::dropped()
            }
        }
    }

    /// Fallback completion: settle `task_id` if it is still running.
    /// A no-op when the real `complete` already arrived.
    pub fn finalize(&mut self, task_id: &str) -> Vec<Effect> {
        let Some(slot) = self.locate_task(task_id) else {
            return Vec::new();
        };

        self.apply(slot, |state| {
            if state.status == SessionStatus::Running {
                info!("Finalizing {} without a complete event", task_id);
                router::complete(state, None)
            } else {
                Applied::default()
            }
        })
    }

    // ------------------------------------------------------------------

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn issue_ticket(&mut self) -> LaunchTicket {
        self.next_ticket += 1;
        LaunchTicket(self.next_ticket)
    }

    fn locate_task(&self, task_id: &str) -> Option<Slot> {
        if self.foreground.state.task_id.as_deref() == Some(task_id) {
            return Some(Slot::Foreground);
        }
        self.registry.position_by_task(task_id).map(Slot::Background)
    }

    fn locate_ticket(&self, ticket: LaunchTicket) -> Option<Slot> {
        if self.foreground.state.launch_ticket == Some(ticket) {
            return Some(Slot::Foreground);
        }
        self.registry.position_by_ticket(ticket).map(Slot::Background)
    }

    /// Run `f` against one session. Background entries are copied, changed
    /// and swapped in as a new registry only when `f` reports a change.
    fn apply<F>(&mut self, slot: Slot, f: F) -> Vec<Effect>
    where
        F: FnOnce(&mut SessionState) -> Applied,
    {
        let applied = match slot {
            Slot::Foreground => f(&mut self.foreground.state),
            Slot::Background(index) => {
                let Some(entry) = self.registry.at(index) else {
                    return Vec::new();
                };
                let mut snapshot = SessionSnapshot::clone(entry);
                let applied = f(&mut snapshot.state);
                if applied.changed {
                    self.registry = self.registry.with_replaced(index, snapshot);
                }
                applied
            }
        };

        if applied.changed {
            self.touch();
        }
        applied.effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mux() -> Multiplexer {
        Multiplexer::from_config(&MuxConfig::default())
    }

    #[test]
    fn test_start_issues_request_with_selection() {
        let mut mux = mux();
        let plan = mux.start("fix the build", false);

        assert!(plan.backgrounded.is_none());
        match plan.effects.as_slice() {
            [Effect::StartSession { ticket, request }] => {
                assert_eq!(*ticket, plan.ticket);
                assert_eq!(request.task_description, "fix the build");
                assert_eq!(request.llm_provider, "anthropic");
                assert!(!request.is_chat_session);
            }
            other => panic!("Expected a start request, got {:?}", other),
        }
        assert_eq!(mux.foreground().status(), SessionStatus::Running);
        assert_eq!(mux.foreground().launch_ticket(), Some(plan.ticket));
    }

    #[test]
    fn test_tickets_are_unique() {
        let mut mux = mux();
        let a = mux.start("a", false).ticket;
        let b = mux.start("b", false).ticket;
        assert_ne!(a, b);
    }

    #[test]
    fn test_background_of_blank_foreground_is_noop() {
        let mut mux = mux();
        let revision = mux.revision();
        assert!(mux.background_current().is_none());
        assert_eq!(mux.revision(), revision);
    }

    #[test]
    fn test_send_message_requires_settled_session() {
        let mut mux = mux();
        assert!(matches!(
            mux.send_message("hi"),
            Err(Error::NoForegroundSession(_))
        ));

        mux.start("chat", true);
        assert!(matches!(mux.send_message("hi"), Err(Error::SessionBusy)));
    }

    #[test]
    fn test_pause_and_resume() {
        let mut mux = mux();
        assert!(!mux.pause());

        mux.start("task", false);
        assert!(mux.pause());
        assert_eq!(mux.foreground().status(), SessionStatus::Paused);
        assert!(!mux.pause());
        assert!(mux.resume());
        assert_eq!(mux.foreground().status(), SessionStatus::Running);
    }

    #[test]
    fn test_set_show_thinking_only_bumps_on_change() {
        let mut mux = mux();
        let revision = mux.revision();
        mux.set_show_thinking(false);
        assert_eq!(mux.revision(), revision);
        mux.set_show_thinking(true);
        assert!(mux.show_thinking());
        assert_eq!(mux.revision(), revision + 1);
    }
}
