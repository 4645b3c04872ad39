//! Capacity-bounded event store and the refresh merge.

use std::collections::HashSet;

use shared::domain::NormalizedEvent;

pub const DEFAULT_STORE_CAPACITY: usize = 2000;

/// Ordered events, unique by id, never longer than `capacity`.
#[derive(Debug, Clone)]
pub struct EventStore {
    events: Vec<NormalizedEvent>,
    capacity: usize,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_STORE_CAPACITY)
    }
}

impl EventStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn events(&self) -> &[NormalizedEvent] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &NormalizedEvent> {
        self.events.iter()
    }

    pub fn get(&self, id: &str) -> Option<&NormalizedEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Drops everything and takes `batch` as the new contents.
    pub fn replace(&mut self, batch: Vec<NormalizedEvent>) {
        self.events = unique_by_id(batch, &HashSet::new());
        self.events.truncate(self.capacity);
    }

    /// Appends the events of `batch` whose ids are not already stored,
    /// keeping their relative order. Returns how many were added.
    pub fn append_unique(&mut self, batch: Vec<NormalizedEvent>) -> usize {
        let existing: HashSet<&str> = self.events.iter().map(|e| e.id.as_str()).collect();
        let fresh = unique_by_id(batch, &existing);
        let before = self.events.len();
        self.events.extend(fresh);
        self.events.truncate(self.capacity);
        self.events.len() - before
    }

    /// Reconciles a freshly fetched first page against the stored pages.
    ///
    /// The first `limit` stored entries are the stale page-1 window and are
    /// replaced wholesale by `page_one`. Deeper entries survive unless their id
    /// reappears in `page_one`. The result is re-sorted newest first (stable,
    /// so equal timestamps keep their relative order) and capped.
    pub fn merge_first_page(&mut self, page_one: Vec<NormalizedEvent>, limit: usize) -> MergeStats {
        let page_one = unique_by_id(page_one, &HashSet::new());
        let page_one_ids: HashSet<String> = page_one.iter().map(|e| e.id.clone()).collect();

        let split = limit.min(self.events.len());
        let tail = self.events.split_off(split);
        let replaced = self.events.len();

        let mut merged = page_one;
        let incoming = merged.len();
        let mut kept_deep = 0;
        for event in tail {
            if !page_one_ids.contains(&event.id) {
                merged.push(event);
                kept_deep += 1;
            }
        }

        merged.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        let evicted = merged.len().saturating_sub(self.capacity);
        merged.truncate(self.capacity);
        self.events = merged;

        MergeStats {
            incoming,
            replaced,
            kept_deep,
            evicted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Distinct events in the fetched first page.
    pub incoming: usize,
    /// Stored entries that made up the old page-1 window.
    pub replaced: usize,
    /// Deeper entries carried over.
    pub kept_deep: usize,
    /// Entries dropped by the capacity bound.
    pub evicted: usize,
}

fn unique_by_id(batch: Vec<NormalizedEvent>, existing: &HashSet<&str>) -> Vec<NormalizedEvent> {
    let mut seen = HashSet::new();
    batch
        .into_iter()
        .filter(|e| !existing.contains(e.id.as_str()) && seen.insert(e.id.clone()))
        .collect()
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
