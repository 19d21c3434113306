//! Session history
//!
//! Summaries of sessions that reached a resting state (completed, failed,
//! cancelled or reset). The multiplexer hands summaries to a
//! [`HistoryStore`]; storage is the store's business.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use taskmux_protocol::{ConversationTurn, TokenUsage};

use crate::buffer::StreamLine;
use crate::config::{DEFAULT_HISTORY_LIMIT, HistoryConfig};
use crate::error::{Error, Result};
use crate::provider::ProviderBinding;
use crate::session::{SessionState, SessionStatus};

/// A finished session as kept in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Backend correlation id when there is one, otherwise a fresh id
    pub id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub task_description: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub is_chat_session: bool,
    pub transcript: Vec<StreamLine>,
    /// Lines ever written, including ones trimmed from the transcript
    pub line_count: u64,
    #[serde(default)]
    pub conversation_turns: Vec<ConversationTurn>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub binding: ProviderBinding,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn capture(state: &SessionState) -> Self {
        Self {
            id: state
                .task_id()
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            task_id: state.task_id().map(str::to_string),
            task_description: state.task_description().to_string(),
            status: state.status(),
            is_chat_session: state.is_chat_session(),
            transcript: state.buffer().to_vec(),
            line_count: state.buffer().line_counter(),
            conversation_turns: state.conversation_turns().to_vec(),
            usage: state.cumulative_usage(),
            binding: state.binding().clone(),
            started_at: state.started_at(),
            finished_at: Utc::now(),
        }
    }
}

/// Where finished sessions go
pub trait HistoryStore: Send + Sync {
    /// Most recent first
    fn load(&self) -> Result<Vec<SessionSummary>>;

    /// Add or refresh a summary. A summary with an id already present
    /// replaces the old one and moves to the front.
    fn record(&self, summary: SessionSummary) -> Result<()>;
}

fn upsert(entries: &mut Vec<SessionSummary>, summary: SessionSummary, limit: usize) {
    entries.retain(|entry| entry.id != summary.id);
    entries.insert(0, summary);
    entries.truncate(limit.max(1));
}

/// History kept in a single JSON file
pub struct JsonHistoryStore {
    path: PathBuf,
    limit: usize,
    write_lock: Mutex<()>,
}

impl JsonHistoryStore {
    pub fn new(path: PathBuf, limit: usize) -> Self {
        Self {
            path,
            limit,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &HistoryConfig) -> Result<Self> {
        let path = match &config.path {
            Some(path) => path.clone(),
            None => Self::default_path()?,
        };
        Ok(Self::new(path, config.limit))
    }

    /// `<data dir>/taskmux/history.json`
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::data_dir()
            .map(|p| p.join("taskmux"))
            .unwrap_or_else(|| PathBuf::from(".taskmux"));
        Ok(base.join("history.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<SessionSummary>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let json = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&json) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("Discarding unreadable history {:?}: {}", self.path, e);
                Ok(Vec::new())
            }
        }
    }

    fn write(&self, entries: &[SessionSummary]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::History(format!("Failed to create history dir: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Default for JsonHistoryStore {
    fn default() -> Self {
        let path = Self::default_path().unwrap_or_else(|_| PathBuf::from("history.json"));
        Self::new(path, DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryStore for JsonHistoryStore {
    fn load(&self) -> Result<Vec<SessionSummary>> {
        self.read()
    }

    fn record(&self, summary: SessionSummary) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut entries = self.read()?;
        debug!("Recording session {} ({}) to history", summary.id, summary.status);
        upsert(&mut entries, summary, self.limit);
        self.write(&entries)
    }
}

/// History kept in memory
pub struct MemoryHistoryStore {
    entries: Mutex<Vec<SessionSummary>>,
    limit: usize,
}

impl MemoryHistoryStore {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self) -> Result<Vec<SessionSummary>> {
        Ok(self.entries.lock().clone())
    }

    fn record(&self, summary: SessionSummary) -> Result<()> {
        upsert(&mut self.entries.lock(), summary, self.limit);
        Ok(())
    }
}
