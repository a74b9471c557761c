//! Epoch-windowed in-memory cache of resolved events.
//!
//! [`EpochWindow`] keeps resolved events of the newest `retention` epochs,
//! bucketed by epoch. When an event from a newer epoch arrives, every bucket
//! with `epoch <= newest - retention` is evicted in one step, so at most
//! `retention` epochs are ever resident.
//!
//! # Concurrency
//!
//! The whole structure sits behind one [`RwLock`]: lookups share the lock,
//! `put`/`advance`/`seed` take it exclusively. The sink's edge worker writes,
//! the crawler and the buffer read.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::event::Event;
use crate::id::{Epoch, EventId};

/// Smallest supported window: the current epoch plus one prior.
pub const MIN_RETENTION: u32 = 2;
/// Expected bucket size, used to pre-size new epoch maps.
const BUCKET_CAPACITY: usize = 5000;

#[derive(Debug)]
struct Window {
    current: Epoch,
    buckets: BTreeMap<Epoch, HashMap<EventId, Event>>,
}

impl Window {
    /// Oldest epoch that may stay resident while `current` is the newest.
    const fn floor(current: Epoch, retention: u32) -> Epoch {
        current.saturating_sub(retention - 1)
    }

    fn evict_below(&mut self, floor: Epoch) -> usize {
        let kept = self.buckets.split_off(&floor);
        let evicted = std::mem::replace(&mut self.buckets, kept);
        evicted.len()
    }
}

/// Resolved events of the newest epochs, keyed by epoch then id.
#[derive(Debug)]
pub struct EpochWindow {
    retention: u32,
    inner: RwLock<Window>,
}

impl EpochWindow {
    /// Create a window positioned at `current`.
    ///
    /// `retention` is clamped to at least [`MIN_RETENTION`].
    #[must_use]
    pub fn new(retention: u32, current: Epoch) -> Self {
        let mut buckets = BTreeMap::new();
        buckets.insert(current, HashMap::with_capacity(BUCKET_CAPACITY));
        Self {
            retention: retention.max(MIN_RETENTION),
            inner: RwLock::new(Window { current, buckets }),
        }
    }

    #[must_use]
    pub const fn retention(&self) -> u32 {
        self.retention
    }

    fn read(&self) -> RwLockReadGuard<'_, Window> {
        // A poisoned lock only means a writer panicked mid-update; the map is
        // still structurally valid, so keep serving it.
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Window> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn has(&self, id: &EventId) -> bool {
        self.read()
            .buckets
            .get(&id.epoch())
            .is_some_and(|bucket| bucket.contains_key(id))
    }

    #[must_use]
    pub fn get(&self, id: &EventId) -> Option<Event> {
        self.read()
            .buckets
            .get(&id.epoch())
            .and_then(|bucket| bucket.get(id))
            .cloned()
    }

    /// Insert a resolved event.
    ///
    /// Returns `false` when the event was not inserted: either its epoch has
    /// already left the window, or the id is cached already (entries are
    /// write-once).
    pub fn put(&self, event: Event) -> bool {
        let epoch = event.epoch();
        let mut window = self.write();

        if epoch > window.current {
            self.advance_locked(&mut window, epoch);
        } else if epoch < Window::floor(window.current, self.retention) {
            debug!(id = %event.id(), epoch, current = window.current, "put below epoch window");
            return false;
        }

        let bucket = window
            .buckets
            .entry(epoch)
            .or_insert_with(|| HashMap::with_capacity(BUCKET_CAPACITY));
        match bucket.entry(event.id()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(event);
                true
            }
        }
    }

    #[must_use]
    pub fn current_epoch(&self) -> Epoch {
        self.read().current
    }

    /// Move the window forward to `to`. No-op if `to <= current`.
    pub fn advance(&self, to: Epoch) {
        let mut window = self.write();
        if to > window.current {
            self.advance_locked(&mut window, to);
        }
    }

    fn advance_locked(&self, window: &mut Window, to: Epoch) {
        let from = window.current;
        window.current = to;
        window
            .buckets
            .entry(to)
            .or_insert_with(|| HashMap::with_capacity(BUCKET_CAPACITY));
        let evicted = window.evict_below(Window::floor(to, self.retention));
        debug!(from, to, evicted, "epoch window advanced");
    }

    /// Bulk-load events of one epoch, e.g. those already durable at startup.
    ///
    /// Advances the window to `epoch` first. Returns the number inserted.
    pub fn seed(&self, epoch: Epoch, events: impl IntoIterator<Item = Event>) -> usize {
        self.advance(epoch);
        events
            .into_iter()
            .filter(|event| event.epoch() == epoch)
            .map(|event| self.put(event))
            .filter(|inserted| *inserted)
            .count()
    }

    /// Total number of cached events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().buckets.values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Epochs that currently have a bucket, ascending.
    #[must_use]
    pub fn resident_epochs(&self) -> Vec<Epoch> {
        self.read().buckets.keys().copied().collect()
    }
}
