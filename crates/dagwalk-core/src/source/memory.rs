use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{EventSource, SourceError};
use crate::event::Event;
use crate::id::{BlockHeight, Epoch, EventId};

#[derive(Debug, Default)]
struct FetchLog {
    fetched: Vec<EventId>,
    failures_left: usize,
    disconnects: usize,
}

/// In-memory DAG served through [`EventSource`].
///
/// Clones share the fetch log, so a test can keep one clone to inspect what the
/// crawler fetched after handing the other to it.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    events: HashMap<EventId, Event>,
    blocks: BTreeMap<BlockHeight, EventId>,
    garbled: HashSet<BlockHeight>,
    epoch: Epoch,
    log: Arc<Mutex<FetchLog>>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source from a dump. Every atropos event tagged with a block
    /// becomes that block's decision event.
    #[must_use]
    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut source = Self::new();
        for event in events {
            if let (true, Some(block)) = (event.is_atropos(), event.block()) {
                source.add_block(block, event.id());
            }
            source.insert(event);
        }
        source
    }

    pub fn insert(&mut self, event: Event) {
        self.epoch = self.epoch.max(event.epoch());
        self.events.insert(event.id(), event);
    }

    pub fn add_block(&mut self, height: BlockHeight, atropos: EventId) {
        self.blocks.insert(height, atropos);
    }

    /// Answer every request for block `height` with undecodable data.
    pub fn garble_block(&mut self, height: BlockHeight) {
        self.garbled.insert(height);
    }

    /// Fail the next `count` requests with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.log().failures_left = count;
    }

    /// Ids requested through [`EventSource::get_event`], in request order.
    #[must_use]
    pub fn fetched(&self) -> Vec<EventId> {
        self.log().fetched.clone()
    }

    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.log().disconnects
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn log(&self) -> MutexGuard<'_, FetchLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_transport(&self) -> Result<(), SourceError> {
        let mut log = self.log();
        if log.failures_left > 0 {
            log.failures_left -= 1;
            return Err(SourceError::Transport("injected failure".to_string()));
        }
        Ok(())
    }
}

impl EventSource for MemorySource {
    fn current_epoch(&mut self) -> Result<Epoch, SourceError> {
        self.check_transport()?;
        Ok(self.epoch.max(1))
    }

    fn latest_block(&mut self) -> Result<BlockHeight, SourceError> {
        self.check_transport()?;
        Ok(self.blocks.keys().next_back().copied().unwrap_or_default())
    }

    fn block_atropos(&mut self, height: BlockHeight) -> Result<Option<EventId>, SourceError> {
        self.check_transport()?;
        if self.garbled.contains(&height) {
            return Err(SourceError::Malformed(format!("block {height} does not decode")));
        }
        Ok(self.blocks.get(&height).copied())
    }

    fn get_event(&mut self, id: &EventId) -> Result<Option<Event>, SourceError> {
        self.check_transport()?;
        self.log().fetched.push(*id);
        Ok(self.events.get(id).cloned())
    }

    fn disconnect(&mut self) {
        self.log().disconnects += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Role;

    #[test]
    fn from_events_registers_atropos_blocks() {
        let a = Event::new(EventId::from_content(3, 1, b"a"), 0, vec![]).expect("valid");
        let b = Event::new(EventId::from_content(3, 2, b"b"), 0, vec![a.id()])
            .expect("valid")
            .with_block(5)
            .with_role(Role::Atropos);
        let mut source = MemorySource::from_events([a.clone(), b.clone()]);

        assert_eq!(source.latest_block(), Ok(5));
        assert_eq!(source.block_atropos(5), Ok(Some(b.id())));
        assert_eq!(source.block_atropos(6), Ok(None));
        assert_eq!(source.current_epoch(), Ok(3));
        assert_eq!(source.get_event(&a.id()), Ok(Some(a.clone())));
        assert!(source.has_event(&b.id()).expect("has"));
        assert_eq!(source.fetched(), vec![a.id(), b.id()]);
    }

    #[test]
    fn injected_failures_are_transient_and_counted_down() {
        let mut source = MemorySource::new();
        let watch = source.clone();
        watch.fail_next(2);
        assert!(matches!(source.latest_block(), Err(SourceError::Transport(_))));
        assert!(matches!(source.latest_block(), Err(SourceError::Transport(_))));
        assert_eq!(source.latest_block(), Ok(0));
        source.disconnect();
        assert_eq!(watch.disconnects(), 1);
    }
}
