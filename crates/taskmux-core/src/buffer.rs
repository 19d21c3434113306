//! Per-session stream buffer
//!
//! An append-only, bounded log of typed lines. Consecutive `text` or
//! `thinking` chunks merge into one line so token deltas read as prose.
//! Line ids come from a counter that only ever grows, so ids stay unique
//! and increasing even after old lines are trimmed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::DEFAULT_BUFFER_CAPACITY;

/// Kind of a buffered line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Text,
    Info,
    Error,
    Success,
    Warning,
    Tool,
    ToolResult,
    SubAgent,
    Analysis,
    Thinking,
    Code,
}

impl LineKind {
    /// Kinds whose consecutive chunks are merged into a single line
    pub fn merges(&self) -> bool {
        matches!(self, LineKind::Text | LineKind::Thinking)
    }
}

/// One line of session output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLine {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: LineKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded line log with monotonic ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBuffer {
    lines: VecDeque<StreamLine>,
    line_counter: u64,
    capacity: usize,
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl StreamBuffer {
    /// Create an empty buffer keeping at most `capacity` lines
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            line_counter: 0,
            capacity: capacity.max(1),
        }
    }

    /// Append `content` and return the id of the line it landed in.
    ///
    /// Merges into the last line when both are the same merging kind;
    /// otherwise pushes a new line, trimming the oldest first if the buffer
    /// is full.
    pub fn append(&mut self, content: impl Into<String>, kind: LineKind) -> u64 {
        let content = content.into();

        if kind.merges()
            && let Some(last) = self.lines.back_mut()
            && last.kind == kind
        {
            last.content.push_str(&content);
            return last.id;
        }

        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }

        self.line_counter += 1;
        self.lines.push_back(StreamLine {
            id: self.line_counter,
            kind,
            content,
            timestamp: Utc::now(),
        });
        self.line_counter
    }

    /// Drop every line and restart ids at 1. Only for explicit user discard.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.line_counter = 0;
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Id of the most recently created line (0 when none ever was)
    pub fn line_counter(&self) -> u64 {
        self.line_counter
    }

    pub fn lines(&self) -> impl Iterator<Item = &StreamLine> {
        self.lines.iter()
    }

    pub fn last(&self) -> Option<&StreamLine> {
        self.lines.back()
    }

    /// Lines created after the line with id `after`
    pub fn since(&self, after: u64) -> impl Iterator<Item = &StreamLine> {
        self.lines.iter().filter(move |line| line.id > after)
    }

    /// Owned copy of the buffered lines, oldest first
    pub fn to_vec(&self) -> Vec<StreamLine> {
        self.lines.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_deltas_merge() {
        let mut buffer = StreamBuffer::default();
        let first = buffer.append("Hel", LineKind::Text);
        let second = buffer.append("lo", LineKind::Text);

        assert_eq!(first, second);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.last().unwrap().content, "Hello");
    }

    #[test]
    fn test_different_kinds_do_not_merge() {
        let mut buffer = StreamBuffer::default();
        buffer.append("thinking...", LineKind::Thinking);
        buffer.append("answer", LineKind::Text);
        buffer.append(" more", LineKind::Text);
        buffer.append("[tool] Read started", LineKind::Tool);
        buffer.append("[tool] Grep started", LineKind::Tool);

        let kinds: Vec<LineKind> = buffer.lines().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![LineKind::Thinking, LineKind::Text, LineKind::Tool, LineKind::Tool]
        );
        let ids: Vec<u64> = buffer.lines().map(|l| l.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_capacity_trims_oldest_and_keeps_ids_increasing() {
        let mut buffer = StreamBuffer::new(500);
        for i in 0..1200 {
            let kind = if i % 2 == 0 { LineKind::Info } else { LineKind::Tool };
            buffer.append(format!("line {}", i), kind);
            assert!(buffer.len() <= 500);
        }

        assert_eq!(buffer.len(), 500);
        assert_eq!(buffer.line_counter(), 1200);

        let ids: Vec<u64> = buffer.lines().map(|l| l.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids.first().copied(), Some(701));
        assert_eq!(ids.last().copied(), Some(1200));
    }

    #[test]
    fn test_merge_does_not_trim() {
        let mut buffer = StreamBuffer::new(2);
        buffer.append("a", LineKind::Info);
        buffer.append("b", LineKind::Text);
        buffer.append("c", LineKind::Text);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.lines().next().unwrap().content, "a");
    }

    #[test]
    fn test_clear_resets_counter() {
        let mut buffer = StreamBuffer::default();
        buffer.append("x", LineKind::Info);
        buffer.append("y", LineKind::Info);
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.line_counter(), 0);
        assert_eq!(buffer.append("z", LineKind::Info), 1);
    }

    #[test]
    fn test_since() {
        let mut buffer = StreamBuffer::default();
        buffer.append("q", LineKind::Info);
        let anchor = buffer.line_counter();
        buffer.append("a1", LineKind::Text);
        buffer.append("[tool] Bash started", LineKind::Tool);
        buffer.append("a2", LineKind::Text);

        let after: Vec<&str> = buffer.since(anchor).map(|l| l.content.as_str()).collect();
        assert_eq!(after, vec!["a1", "[tool] Bash started", "a2"]);
    }

    #[test]
    fn test_line_serializes_kind_as_type() {
        let mut buffer = StreamBuffer::default();
        buffer.append("ok", LineKind::ToolResult);
        let json = serde_json::to_value(buffer.last().unwrap()).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["id"], 1);
    }
}
