//! In-process store with the same contract as the SQLite adapter.
//!
//! Clones share state, so one clone can serve as the [`EventLookup`] while
//! others are handed to the sink workers as [`StoreWriter`]s. Writes for
//! ids registered with [`MemoryStore::fail_on`] are rejected, which lets the
//! skip-and-continue path be driven without a broken database.
//!
//! As in SQLite, lookups only see an event once its edges are written.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Cursors, EventLookup, Store, StoreError, StoreReader, StoreWriter};
use crate::event::Event;
use crate::id::{BlockHeight, Epoch, EventId};

#[derive(Debug, Default)]
struct State {
    events: HashMap<EventId, Event>,
    edges: HashMap<EventId, Vec<EventId>>,
    record_order: Vec<EventId>,
    complete: HashSet<EventId>,
    cursors: Cursors,
    failing: HashSet<EventId>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject every future record write for `id`.
    pub fn fail_on(&self, id: EventId) {
        self.lock().failing.insert(id);
    }

    #[must_use]
    pub fn cursors(&self) -> Cursors {
        self.lock().cursors
    }

    /// Number of completely stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().complete.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids in the order their records were written.
    #[must_use]
    pub fn record_order(&self) -> Vec<EventId> {
        self.lock().record_order.clone()
    }

    /// Stored parent edges of `id`, in position order.
    #[must_use]
    pub fn edges_of(&self, id: &EventId) -> Option<Vec<EventId>> {
        self.lock().edges.get(id).cloned()
    }
}

impl EventLookup for MemoryStore {
    fn has_event(&self, id: &EventId) -> Result<bool, StoreError> {
        Ok(self.lock().complete.contains(id))
    }

    fn get_event(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        let state = self.lock();
        if !state.complete.contains(id) {
            return Ok(None);
        }
        Ok(state.events.get(id).cloned())
    }
}

impl StoreReader for MemoryStore {
    fn cursors(&self) -> Result<Cursors, StoreError> {
        Ok(self.lock().cursors)
    }

    fn events_in_epoch(&self, epoch: Epoch) -> Result<Vec<Event>, StoreError> {
        let state = self.lock();
        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|event| event.epoch() == epoch && state.complete.contains(&event.id()))
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.id().seq(), event.id()));
        Ok(events)
    }
}

impl Store for MemoryStore {
    type Reader = Self;
    type Writer = Self;

    fn reader(&self) -> Result<Self, StoreError> {
        Ok(self.clone())
    }

    fn writer(&self) -> Result<Self, StoreError> {
        Ok(self.clone())
    }
}

impl StoreWriter for MemoryStore {
    fn insert_event(&mut self, event: &Event) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.failing.contains(&event.id()) {
            return Err(StoreError::Rejected(event.id()));
        }
        if !state.events.contains_key(&event.id()) {
            state.events.insert(event.id(), event.clone());
            state.record_order.push(event.id());
        }
        Ok(())
    }

    fn insert_edges(&mut self, event: &Event) -> Result<(), StoreError> {
        let mut state = self.lock();
        let id = event.id();
        if !state.events.contains_key(&id) {
            return Err(StoreError::Rejected(id));
        }
        if let Some(parent) = event.parents().iter().find(|p| !state.complete.contains(*p)) {
            return Err(StoreError::Rejected(*parent));
        }
        state
            .edges
            .entry(id)
            .or_insert_with(|| event.parents().to_vec());
        state.complete.insert(id);
        Ok(())
    }

    fn set_epoch(&mut self, epoch: Epoch) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.cursors.epoch = state.cursors.epoch.max(epoch);
        Ok(())
    }

    fn set_last_block(&mut self, block: BlockHeight) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.cursors.last_block = state.cursors.last_block.max(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(seq: u32, parents: Vec<EventId>) -> Event {
        let id = EventId::from_content(1, seq, &seq.to_be_bytes());
        Event::new(id, 0, parents).expect("valid event")
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryStore::new();
        let mut writer = store.clone();
        let a = event(1, vec![]);
        writer.insert_event(&a).expect("insert");
        writer.insert_edges(&a).expect("edges");
        assert!(store.has_event(&a.id()).expect("has"));
        assert_eq!(store.get_event(&a.id()).expect("get"), Some(a));
    }

    #[test]
    fn edges_need_the_record_and_complete_parents() {
        let mut store = MemoryStore::new();
        let a = event(1, vec![]);
        let b = event(2, vec![a.id()]);
        assert!(matches!(store.insert_edges(&b), Err(StoreError::Rejected(id)) if id == b.id()));

        store.insert_event(&b).expect("insert b");
        store.insert_event(&a).expect("insert a");
        assert!(matches!(store.insert_edges(&b), Err(StoreError::Rejected(id)) if id == a.id()));

        store.insert_edges(&a).expect("edges a");
        store.insert_edges(&b).expect("edges b");
        assert_eq!(store.edges_of(&b.id()), Some(vec![a.id()]));
        assert_eq!(store.record_order(), vec![b.id(), a.id()]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn record_alone_is_invisible() {
        let mut store = MemoryStore::new();
        let a = event(1, vec![]);
        store.insert_event(&a).expect("insert");
        assert!(!store.has_event(&a.id()).expect("has"));
        assert_eq!(store.get_event(&a.id()).expect("get"), None);
        assert!(store.events_in_epoch(1).expect("epoch").is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn failing_ids_are_rejected() {
        let mut store = MemoryStore::new();
        let a = event(1, vec![]);
        store.fail_on(a.id());
        assert!(store.insert_event(&a).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn cursors_are_monotonic() {
        let mut store = MemoryStore::new();
        store.set_epoch(3).expect("epoch");
        store.set_epoch(2).expect("epoch");
        store.set_last_block(10).expect("block");
        store.set_last_block(4).expect("block");
        assert_eq!(
            store.cursors(),
            Cursors {
                epoch: 3,
                last_block: 10
            }
        );
    }
}
