use crate::error::{RelayError, RelayResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// One child as seen by its parent tier.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry<S> {
    /// Last self-reported state.
    pub state: S,
    /// When the child last sent anything.
    pub last_seen: DateTime<Utc>,
}

/// A parent's non-authoritative view of its children, keyed by name.
///
/// Children self-report through messages, so an entry goes stale when a child
/// dies silently.
#[derive(Debug, Clone)]
pub struct Directory<S> {
    entries: BTreeMap<String, DirectoryEntry<S>>,
}

impl<S> Default for Directory<S> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<S: Copy + PartialEq> Directory<S> {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, returning its previous state if it was already known.
    pub fn insert(&mut self, name: impl Into<String>, state: S) -> Option<S> {
        self.entries
            .insert(
                name.into(),
                DirectoryEntry {
                    state,
                    last_seen: Utc::now(),
                },
            )
            .map(|previous| previous.state)
    }

    /// Forget `name`, returning its last state.
    pub fn remove(&mut self, name: &str) -> Option<S> {
        self.entries.remove(name).map(|entry| entry.state)
    }

    /// Current state of `name`.
    pub fn get(&self, name: &str) -> Option<S> {
        self.entries.get(name).map(|entry| entry.state)
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Move `name` to `to` and return the state it left.
    pub fn transition(&mut self, name: &str, to: S) -> RelayResult<S> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| RelayError::Orchestrator(format!("'{name}' is not in the directory")))?;
        let from = entry.state;
        entry.state = to;
        entry.last_seen = Utc::now();
        Ok(from)
    }

    /// Refresh the last-seen time of `name`. Returns false if unknown.
    pub fn touch(&mut self, name: &str) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// When `name` last reported.
    pub fn last_seen(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries.get(name).map(|entry| entry.last_seen)
    }

    /// Names of every child currently in `state`, in name order.
    pub fn names_in(&self, state: S) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.state == state)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// How many children are in `state`.
    pub fn count_in(&self, state: S) -> usize {
        self.entries.values().filter(|e| e.state == state).count()
    }

    /// Whether every child is in `state`. True for an empty directory.
    pub fn all_in(&self, state: S) -> bool {
        self.entries.values().all(|e| e.state == state)
    }

    /// Every registered name, in order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no child is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
