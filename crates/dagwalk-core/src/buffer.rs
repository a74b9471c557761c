//! Causal-order buffer.
//!
//! Events arrive in any order and leave strictly parents-first. Each
//! buffered event carries the number of parents still unknown; a parent is
//! known once this buffer released it, the [`EpochWindow`] holds it, or the
//! durable store has it. Releasing an event decrements its dependents and
//! releases those that reach zero, through an explicit FIFO work queue.
//!
//! The buffered set is bounded by event count and approximate bytes. What
//! happens at the bound is chosen by [`OverflowPolicy`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::cache::EpochWindow;
use crate::config::BufferConfig;
use crate::error::Interrupted;
use crate::event::Event;
use crate::id::{Epoch, EventId};
use crate::shutdown::Shutdown;
use crate::store::EventLookup;

/// Downstream of the buffer: receives events in causal order.
pub trait EventSink {
    /// Hand one released event downstream.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if shutdown was requested or the downstream
    /// stage is gone.
    fn deliver(&self, event: Event) -> Result<(), Interrupted>;
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn deliver(&self, event: Event) -> Result<(), Interrupted> {
        (**self).deliver(event)
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn deliver(&self, event: Event) -> Result<(), Interrupted> {
        (**self).deliver(event)
    }
}

impl EventSink for crossbeam_channel::Sender<Event> {
    fn deliver(&self, event: Event) -> Result<(), Interrupted> {
        self.send(event).map_err(|_| Interrupted)
    }
}

/// What to do when a new event would exceed the buffer bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Drop the oldest buffered events until the new one fits.
    #[default]
    EvictOldest,
    /// Refuse the incoming event.
    RejectNew,
}

/// Result of a successful [`CausalBuffer::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The event and `count - 1` dependents were released downstream.
    Released { count: usize },
    /// The event waits for `missing` parents.
    Buffered { missing: usize },
    /// The event is already known and was discarded.
    Duplicate,
    /// The buffer is full and the policy is [`OverflowPolicy::RejectNew`].
    Rejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub pushed: u64,
    pub released: u64,
    pub duplicates: u64,
    pub evicted: u64,
    pub rejected: u64,
    /// Events currently waiting for parents.
    pub buffered: usize,
    /// Approximate bytes held by waiting events.
    pub buffered_bytes: usize,
}

#[derive(Debug)]
struct Waiting {
    event: Event,
    missing: usize,
    size: usize,
    arrival: u64,
}

/// Holds events until their parents are known, then delivers them to `S`.
pub struct CausalBuffer<S> {
    limits: BufferConfig,
    cache: Arc<EpochWindow>,
    lookup: Arc<dyn EventLookup>,
    sink: S,
    shutdown: Shutdown,
    waiting: HashMap<EventId, Waiting>,
    /// parent id -> ids waiting on it, in registration order
    dependents: HashMap<EventId, Vec<EventId>>,
    /// (arrival, id) in push order; stale entries are skipped lazily
    arrivals: VecDeque<(u64, EventId)>,
    released: BTreeMap<Epoch, HashSet<EventId>>,
    next_arrival: u64,
    bytes: usize,
    stats: BufferStats,
}

impl<S: EventSink> CausalBuffer<S> {
    #[must_use]
    pub fn new(
        limits: BufferConfig,
        cache: Arc<EpochWindow>,
        lookup: Arc<dyn EventLookup>,
        sink: S,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            limits,
            cache,
            lookup,
            sink,
            shutdown,
            waiting: HashMap::new(),
            dependents: HashMap::new(),
            arrivals: VecDeque::new(),
            released: BTreeMap::new(),
            next_arrival: 0,
            bytes: 0,
            stats: BufferStats::default(),
        }
    }

    /// Accept one event in arbitrary arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if shutdown was requested before the push, or
    /// if the sink refused a released event.
    pub fn push(&mut self, event: Event) -> Result<PushOutcome, Interrupted> {
        if self.shutdown.is_cancelled() {
            return Err(Interrupted);
        }
        self.stats.pushed += 1;

        let id = event.id();
        if self.is_duplicate(&id) {
            self.stats.duplicates += 1;
            trace!(%id, "duplicate event discarded");
            return Ok(PushOutcome::Duplicate);
        }

        let unknown: Vec<EventId> = event
            .parents()
            .iter()
            .copied()
            .filter(|parent| !self.is_known(parent))
            .collect();

        if unknown.is_empty() {
            let count = self.release_from(event)?;
            return Ok(PushOutcome::Released { count });
        }

        let size = event.approx_size();
        if !self.make_room(size) {
            self.stats.rejected += 1;
            debug!(%id, buffered = self.waiting.len(), "buffer full, event rejected");
            return Ok(PushOutcome::Rejected);
        }

        for parent in &unknown {
            self.dependents.entry(*parent).or_default().push(id);
        }
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        self.arrivals.push_back((arrival, id));
        self.bytes += size;
        self.waiting.insert(
            id,
            Waiting {
                event,
                missing: unknown.len(),
                size,
                arrival,
            },
        );
        trace!(%id, missing = unknown.len(), "event buffered");
        Ok(PushOutcome::Buffered {
            missing: unknown.len(),
        })
    }

    /// Drop every waiting event. Release history is kept.
    pub fn clear(&mut self) {
        let dropped = self.waiting.len();
        self.waiting.clear();
        self.dependents.clear();
        self.arrivals.clear();
        self.bytes = 0;
        if dropped > 0 {
            debug!(dropped, "buffer cleared");
        }
    }

    #[must_use]
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            buffered: self.waiting.len(),
            buffered_bytes: self.bytes,
            ..self.stats
        }
    }

    /// Number of events waiting for parents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    #[must_use]
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn was_released(&self, id: &EventId) -> bool {
        self.released
            .get(&id.epoch())
            .is_some_and(|ids| ids.contains(id))
    }

    fn is_durable(&self, id: &EventId) -> bool {
        match self.lookup.has_event(id) {
            Ok(found) => found,
            Err(err) => {
                warn!(%id, error = %err, code = %err.code(), "store lookup failed, treating as unknown");
                false
            }
        }
    }

    fn is_duplicate(&self, id: &EventId) -> bool {
        self.waiting.contains_key(id)
            || self.was_released(id)
            || self.cache.has(id)
            || self.is_durable(id)
    }

    fn is_known(&self, id: &EventId) -> bool {
        self.was_released(id) || self.cache.has(id) || self.is_durable(id)
    }

    /// Apply the overflow policy so an event of `size` bytes fits.
    /// Returns `false` if the event must be refused.
    fn make_room(&mut self, size: usize) -> bool {
        let fits = |buffer: &Self| {
            buffer.waiting.len() < buffer.limits.max_events
                && buffer.bytes + size <= buffer.limits.max_bytes
        };
        if fits(self) || self.waiting.is_empty() {
            return true;
        }
        match self.limits.overflow {
            OverflowPolicy::RejectNew => false,
            OverflowPolicy::EvictOldest => {
                while !fits(self) && self.evict_oldest() {}
                true
            }
        }
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some((arrival, id)) = self.arrivals.pop_front() {
            let current = self.waiting.get(&id).is_some_and(|w| w.arrival == arrival);
            if !current {
                continue;
            }
            let Some(evicted) = self.waiting.remove(&id) else {
                continue;
            };
            self.bytes -= evicted.size;
            for parent in evicted.event.parents() {
                if let Some(children) = self.dependents.get_mut(parent) {
                    children.retain(|child| *child != id);
                    if children.is_empty() {
                        self.dependents.remove(parent);
                    }
                }
            }
            self.stats.evicted += 1;
            debug!(%id, "evicted oldest buffered event");
            return true;
        }
        false
    }

    /// Released ids are kept for the cache's retention window only. An
    /// event arriving after every released event is more than `retention - 1`
    /// epochs newer than it can no longer see it as released here and relies
    /// on the cache or the store instead. Without a store behind it (as in
    /// an in-memory replay) such a straggler stays buffered as an orphan.
    fn remember_released(&mut self, id: EventId) {
        self.released.entry(id.epoch()).or_default().insert(id);
        let newest = self.released.keys().next_back().copied().unwrap_or_default();
        let floor = newest.saturating_sub(self.cache.retention() - 1);
        if self.released.first_key_value().is_some_and(|(epoch, _)| *epoch < floor) {
            self.released = self.released.split_off(&floor);
        }
    }

    /// Deliver `ready` and every dependent it unblocks, parents first.
    fn release_from(&mut self, ready: Event) -> Result<usize, Interrupted> {
        let mut queue = VecDeque::from([ready]);
        let mut count = 0;

        while let Some(event) = queue.pop_front() {
            let id = event.id();
            if event.epoch() > self.cache.current_epoch() {
                self.cache.advance(event.epoch());
            }
            self.remember_released(id);
            self.sink.deliver(event)?;
            self.stats.released += 1;
            count += 1;
            trace!(%id, "event released");

            let Some(children) = self.dependents.remove(&id) else {
                continue;
            };
            for child in children {
                let Some(waiting) = self.waiting.get_mut(&child) else {
                    continue;
                };
                waiting.missing = waiting.missing.saturating_sub(1);
                if waiting.missing == 0
                    && let Some(unblocked) = self.waiting.remove(&child)
                {
                    self.bytes -= unblocked.size;
                    queue.push_back(unblocked.event);
                }
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreWriter};
    use crossbeam_channel::{Receiver, unbounded};

    fn id(epoch: Epoch, seq: u32, tag: &str) -> EventId {
        EventId::from_content(epoch, seq, tag.as_bytes())
    }

    fn event(id: EventId, parents: &[EventId]) -> Event {
        Event::new(id, 0, parents.to_vec()).expect("valid event")
    }

    fn limits(max_events: usize, overflow: OverflowPolicy) -> BufferConfig {
        BufferConfig {
            max_events,
            max_bytes: 1 << 20,
            overflow,
        }
    }

    struct Harness {
        buffer: CausalBuffer<crossbeam_channel::Sender<Event>>,
        out: Receiver<Event>,
        cache: Arc<EpochWindow>,
        store: MemoryStore,
        shutdown: Shutdown,
    }

    fn harness(limits: BufferConfig) -> Harness {
        let (tx, out) = unbounded();
        let cache = Arc::new(EpochWindow::new(2, 1));
        let store = MemoryStore::new();
        let shutdown = Shutdown::new();
        let buffer = CausalBuffer::new(
            limits,
            Arc::clone(&cache),
            Arc::new(store.clone()),
            tx,
            shutdown.clone(),
        );
        Harness {
            buffer,
            out,
            cache,
            store,
            shutdown,
        }
    }

    fn drained(out: &Receiver<Event>) -> Vec<EventId> {
        out.try_iter().map(|e| e.id()).collect()
    }

    #[test]
    fn children_first_arrival_is_released_parents_first() {
        let mut h = harness(BufferConfig::default());
        let a = event(id(1, 1, "a"), &[]);
        let b = event(id(1, 2, "b"), &[a.id()]);
        let c = event(id(1, 3, "c"), &[b.id()]);

        assert_eq!(h.buffer.push(c.clone()), Ok(PushOutcome::Buffered { missing: 1 }));
        assert_eq!(h.buffer.push(b.clone()), Ok(PushOutcome::Buffered { missing: 1 }));
        assert!(drained(&h.out).is_empty());

        assert_eq!(h.buffer.push(a.clone()), Ok(PushOutcome::Released { count: 3 }));
        assert_eq!(drained(&h.out), vec![a.id(), b.id(), c.id()]);
        assert!(h.buffer.is_empty());
        assert_eq!(h.buffer.stats().buffered_bytes, 0);
    }

    #[test]
    fn merge_waits_for_every_parent() {
        let mut h = harness(BufferConfig::default());
        let a = event(id(1, 1, "a"), &[]);
        let b = event(id(1, 2, "b"), &[]);
        let m = event(id(1, 3, "m"), &[a.id(), b.id()]);

        assert_eq!(h.buffer.push(m.clone()), Ok(PushOutcome::Buffered { missing: 2 }));
        assert_eq!(h.buffer.push(b.clone()), Ok(PushOutcome::Released { count: 1 }));
        assert_eq!(h.buffer.push(a.clone()), Ok(PushOutcome::Released { count: 2 }));
        assert_eq!(drained(&h.out), vec![b.id(), a.id(), m.id()]);
    }

    #[test]
    fn siblings_release_in_registration_order() {
        let mut h = harness(BufferConfig::default());
        let root = event(id(1, 1, "root"), &[]);
        let x = event(id(1, 2, "x"), &[root.id()]);
        let y = event(id(1, 3, "y"), &[root.id()]);
        let z = event(id(1, 4, "z"), &[root.id()]);
        for e in [&y, &z, &x] {
            h.buffer.push(e.clone()).expect("push");
        }
        h.buffer.push(root.clone()).expect("push");
        assert_eq!(drained(&h.out), vec![root.id(), y.id(), z.id(), x.id()]);
    }

    #[test]
    fn duplicates_are_discarded_in_every_state() {
        let mut h = harness(BufferConfig::default());
        let a = event(id(1, 1, "a"), &[]);
        let b = event(id(1, 2, "b"), &[a.id()]);
        let cached = event(id(1, 9, "cached"), &[]);
        h.cache.put(cached.clone());

        h.buffer.push(b.clone()).expect("push");
        assert_eq!(h.buffer.push(b.clone()), Ok(PushOutcome::Duplicate));
        h.buffer.push(a.clone()).expect("push");
        assert_eq!(h.buffer.push(a.clone()), Ok(PushOutcome::Duplicate));
        assert_eq!(h.buffer.push(b.clone()), Ok(PushOutcome::Duplicate));
        assert_eq!(h.buffer.push(cached), Ok(PushOutcome::Duplicate));

        assert_eq!(drained(&h.out), vec![a.id(), b.id()]);
        let stats = h.buffer.stats();
        assert_eq!(stats.duplicates, 4);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.pushed, 6);
    }

    #[test]
    fn durable_parents_count_as_known() {
        let mut h = harness(BufferConfig::default());
        let a = event(id(1, 1, "a"), &[]);
        let b = event(id(1, 2, "b"), &[a.id()]);
        let mut writer = h.store.clone();
        writer.insert_event(&a).expect("store a");
        writer.insert_edges(&a).expect("store a edges");

        assert_eq!(h.buffer.push(b.clone()), Ok(PushOutcome::Released { count: 1 }));
        assert_eq!(h.buffer.push(a), Ok(PushOutcome::Duplicate));
        assert_eq!(drained(&h.out), vec![b.id()]);
    }

    #[test]
    fn newer_epoch_advances_cache_before_delivery() {
        let mut h = harness(BufferConfig::default());
        let a = event(id(1, 1, "a"), &[]);
        let b = event(id(2, 1, "b"), &[a.id()]);
        let c = event(id(3, 1, "c"), &[b.id()]);
        h.buffer.push(c).expect("push");
        h.buffer.push(b).expect("push");
        assert_eq!(h.cache.current_epoch(), 1);
        h.buffer.push(a).expect("push");
        assert_eq!(h.cache.current_epoch(), 3);
    }

    #[test]
    fn released_history_follows_cache_retention() {
        let mut h = harness(BufferConfig::default());
        let old = event(id(1, 1, "old"), &[]);
        h.buffer.push(old.clone()).expect("push");
        for epoch in 2..=4 {
            h.buffer.push(event(id(epoch, 1, "tick"), &[])).expect("push");
        }
        assert!(!h.buffer.was_released(&old.id()));
        assert_eq!(h.buffer.released.keys().copied().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn evict_oldest_drops_front_and_allows_redelivery() {
        let mut h = harness(limits(2, OverflowPolicy::EvictOldest));
        let p = id(1, 1, "p");
        let q = id(1, 2, "q");
        let r = id(1, 3, "r");
        let first = event(id(1, 10, "first"), &[p]);
        let second = event(id(1, 11, "second"), &[q]);
        let third = event(id(1, 12, "third"), &[r]);

        h.buffer.push(first.clone()).expect("push");
        h.buffer.push(second.clone()).expect("push");
        assert_eq!(h.buffer.push(third), Ok(PushOutcome::Buffered { missing: 1 }));
        assert_eq!(h.buffer.len(), 2);
        assert_eq!(h.buffer.stats().evicted, 1);

        // p no longer unblocks the evicted event
        assert_eq!(
            h.buffer.push(event(p, &[])),
            Ok(PushOutcome::Released { count: 1 })
        );
        assert_eq!(
            h.buffer.push(first.clone()),
            Ok(PushOutcome::Released { count: 1 })
        );
        assert_eq!(drained(&h.out), vec![p, first.id()]);
    }

    #[test]
    fn eviction_keeps_children_waiting_on_the_evicted_event() {
        let mut h = harness(limits(2, OverflowPolicy::EvictOldest));
        let root = id(1, 1, "root");
        let mid = event(id(1, 2, "mid"), &[root]);
        let leaf = event(id(1, 3, "leaf"), &[mid.id()]);
        let other = event(id(1, 4, "other"), &[id(1, 5, "elsewhere")]);

        h.buffer.push(mid.clone()).expect("push");
        h.buffer.push(leaf.clone()).expect("push");
        h.buffer.push(other).expect("push");
        assert_eq!(h.buffer.stats().evicted, 1);

        h.buffer.push(event(root, &[])).expect("push");
        h.buffer.push(mid.clone()).expect("push");
        assert_eq!(drained(&h.out), vec![root, mid.id(), leaf.id()]);
    }

    #[test]
    fn reject_new_refuses_when_full() {
        let mut h = harness(limits(1, OverflowPolicy::RejectNew));
        let first = event(id(1, 10, "first"), &[id(1, 1, "p")]);
        let second = event(id(1, 11, "second"), &[id(1, 2, "q")]);
        h.buffer.push(first).expect("push");
        assert_eq!(h.buffer.push(second), Ok(PushOutcome::Rejected));
        assert_eq!(h.buffer.stats().rejected, 1);
        assert_eq!(h.buffer.len(), 1);
    }

    #[test]
    fn ready_events_bypass_the_bound() {
        let mut h = harness(limits(1, OverflowPolicy::RejectNew));
        h.buffer
            .push(event(id(1, 10, "waiting"), &[id(1, 1, "p")]))
            .expect("push");
        let free = event(id(1, 2, "free"), &[]);
        assert_eq!(h.buffer.push(free), Ok(PushOutcome::Released { count: 1 }));
    }

    #[test]
    fn byte_bound_applies() {
        let mut h = harness(BufferConfig {
            max_events: 100,
            max_bytes: event(id(1, 1, "x"), &[id(1, 2, "y")]).approx_size(),
            overflow: OverflowPolicy::RejectNew,
        });
        h.buffer
            .push(event(id(1, 10, "a"), &[id(1, 1, "p")]))
            .expect("push");
        assert_eq!(
            h.buffer.push(event(id(1, 11, "b"), &[id(1, 2, "q")])),
            Ok(PushOutcome::Rejected)
        );
    }

    #[test]
    fn cancelled_push_is_interrupted() {
        let mut h = harness(BufferConfig::default());
        h.shutdown.cancel();
        assert_eq!(h.buffer.push(event(id(1, 1, "a"), &[])), Err(Interrupted));
        assert_eq!(h.buffer.stats().pushed, 0);
    }

    #[test]
    fn closed_sink_is_interrupted() {
        let mut h = harness(BufferConfig::default());
        drop(h.out);
        assert_eq!(h.buffer.push(event(id(1, 1, "a"), &[])), Err(Interrupted));
    }

    #[test]
    fn clear_drops_waiting_events() {
        let mut h = harness(BufferConfig::default());
        let p = id(1, 1, "p");
        h.buffer.push(event(id(1, 2, "c"), &[p])).expect("push");
        h.buffer.clear();
        assert!(h.buffer.is_empty());
        h.buffer.push(event(p, &[])).expect("push");
        assert_eq!(drained(&h.out), vec![p]);
    }
}
