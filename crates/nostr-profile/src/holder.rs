//! Deduplicating timeline buffer.

use nostr::{Event, display_order};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Called with every event that was newly added to a holder.
pub type InsertCallback = Box<dyn Fn(&Event) + Send + Sync>;

/// Events kept newest-first, at most one per id.
#[derive(Default)]
pub struct EventHolder {
    events: Vec<Event>,
    ids: HashSet<String>,
    on_insert: Option<InsertCallback>,
}

impl EventHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holder that calls `f` after each successful insert.
    pub fn with_callback<F>(f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self {
            on_insert: Some(Box::new(f)),
            ..Self::default()
        }
    }

    /// Insert `event` in display order.
    ///
    /// Returns false and does nothing when an event with the same id is
    /// already held.
    pub fn insert(&mut self, event: Event) -> bool {
        if self.ids.contains(&event.id) {
            return false;
        }

        let pos = self
            .events
            .partition_point(|held| display_order(held, &event) == Ordering::Less);
        self.ids.insert(event.id.clone());
        self.events.insert(pos, event);

        if let Some(callback) = &self.on_insert {
            callback(&self.events[pos]);
        }
        true
    }

    /// Snapshot of the held events, newest first.
    pub fn events(&self) -> Vec<Event> {
        self.events.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Distinct authors of the held events.
    pub fn authors(&self) -> BTreeSet<String> {
        self.events.iter().map(|e| e.pubkey.clone()).collect()
    }
}

impl fmt::Debug for EventHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHolder")
            .field("len", &self.events.len())
            .field("has_callback", &self.on_insert.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn note(id: &str, pubkey: &str, created_at: u64) -> Event {
        Event {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            created_at,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_insert_keeps_newest_first() {
        let mut holder = EventHolder::new();
        holder.insert(note("b", "alice", 20));
        holder.insert(note("a", "alice", 10));
        holder.insert(note("c", "bob", 30));
        holder.insert(note("a2", "bob", 20));

        let ids: Vec<String> = holder.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["c", "a2", "b", "a"]);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut holder = EventHolder::with_callback(move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });

        assert!(holder.insert(note("x", "alice", 10)));
        // Same id, different payload.
        assert!(!holder.insert(note("x", "mallory", 99)));

        assert_eq!(holder.len(), 1);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(holder.events()[0].pubkey, "alice");
    }

    #[test]
    fn test_callback_sees_new_event() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut holder = EventHolder::with_callback(move |e| sink.lock().push(e.id.clone()));

        holder.insert(note("one", "alice", 1));
        holder.insert(note("two", "alice", 2));

        assert_eq!(*seen.lock(), vec!["one", "two"]);
    }

    #[test]
    fn test_queries() {
        let mut holder = EventHolder::new();
        assert!(holder.is_empty());
        holder.insert(note("a", "alice", 1));
        holder.insert(note("b", "bob", 2));
        holder.insert(note("c", "alice", 3));

        assert!(holder.contains("b"));
        assert!(!holder.contains("z"));
        assert_eq!(
            holder.authors().into_iter().collect::<Vec<_>>(),
            vec!["alice", "bob"]
        );
        // Snapshots are restartable.
        assert_eq!(holder.events(), holder.events());
    }
}
