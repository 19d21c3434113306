//! Background session registry
//!
//! An immutable, ordered collection of snapshots. Every change produces a
//! new registry; entries that did not change stay shared with the previous
//! registry, so observers can compare entries with [`Arc::ptr_eq`] and the
//! whole registry with [`BackgroundRegistry::same_as`].

use std::sync::Arc;

use super::forest::{ForkForest, build_forest};
use super::state::{LaunchTicket, SessionSnapshot};

#[derive(Debug, Clone, Default)]
pub struct BackgroundRegistry {
    entries: Arc<Vec<Arc<SessionSnapshot>>>,
}

impl BackgroundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SessionSnapshot>> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<SessionSnapshot>> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Entry whose backend correlation id is `task_id`
    pub fn find_by_task(&self, task_id: &str) -> Option<&Arc<SessionSnapshot>> {
        self.entries
            .iter()
            .find(|entry| entry.state.task_id.as_deref() == Some(task_id))
    }

    /// Whether both registries are the very same value
    pub fn same_as(&self, other: &BackgroundRegistry) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Parent/child view of the entries
    pub fn forest(&self) -> ForkForest {
        build_forest(
            self.entries
                .iter()
                .map(|entry| (entry.id.as_str(), entry.parent_session_id.as_deref())),
        )
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    pub(crate) fn position_by_task(&self, task_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.state.task_id.as_deref() == Some(task_id))
    }

    pub(crate) fn position_by_ticket(&self, ticket: LaunchTicket) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.state.launch_ticket == Some(ticket))
    }

    pub(crate) fn at(&self, index: usize) -> Option<&Arc<SessionSnapshot>> {
        self.entries.get(index)
    }

    /// New registry with `snapshot` appended
    pub(crate) fn with_inserted(&self, snapshot: SessionSnapshot) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.extend(self.entries.iter().cloned());
        entries.push(Arc::new(snapshot));
        Self {
            entries: Arc::new(entries),
        }
    }

    /// New registry with the entry at `index` replaced, keeping its position
    pub(crate) fn with_replaced(&self, index: usize, snapshot: SessionSnapshot) -> Self {
        let mut entries: Vec<Arc<SessionSnapshot>> = self.entries.iter().cloned().collect();
        if let Some(slot) = entries.get_mut(index) {
            *slot = Arc::new(snapshot);
        }
        Self {
            entries: Arc::new(entries),
        }
    }

    /// New registry without entry `id`, plus the removed entry
    pub(crate) fn without(&self, id: &str) -> Option<(Self, Arc<SessionSnapshot>)> {
        let index = self.position(id)?;
        let removed = self.entries[index].clone();
        let entries = self
            .entries
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, entry)| entry.clone())
            .collect();
        Some((
            Self {
                entries: Arc::new(entries),
            },
            removed,
        ))
    }
}
