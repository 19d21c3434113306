//! Per-session tool call de-duplication
//!
//! The same tool call can be reported by the stream channel and by the tool
//! channel. The filter lets the first report through and swallows the echo.

use std::collections::HashSet;

/// Remembers which tool calls already produced a start or result line.
///
/// Owned by exactly one session; copying a session copies the filter by
/// value, so a snapshot never shares it with its source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFilter {
    started: HashSet<String>,
    finished: HashSet<String>,
}

impl ToolCallFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a start line should be written for `tool_id`.
    /// Calls without an id are never filtered.
    pub fn admit_start(&mut self, tool_id: Option<&str>) -> bool {
        match tool_id {
            Some(id) => !self.finished.contains(id) && self.started.insert(id.to_string()),
            None => true,
        }
    }

    /// Whether a result line should be written for `tool_id`
    pub fn admit_result(&mut self, tool_id: Option<&str>) -> bool {
        match tool_id {
            Some(id) => {
                self.started.insert(id.to_string());
                self.finished.insert(id.to_string())
            }
            None => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.finished.is_empty()
    }
}
