//! Wiring of the pipeline stages.
//!
//! ```text
//! source ─▶ crawler ──output──▶ buffer ─▶ sink pipeline ─▶ store
//!                                 ▲
//! jsonl replay ───────────────────┘
//! ```
//!
//! [`Ingest`] owns the shared epoch cache, the read view and the sink. Each
//! `run_*` method consumes it, drives the buffer on the calling thread and
//! drains the sink before returning an [`IngestReport`].

use std::sync::Arc;

use crossbeam_channel::{bounded, select};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferStats, CausalBuffer, PushOutcome};
use crate::cache::EpochWindow;
use crate::config::DagwalkConfig;
use crate::crawler::{CrawlMode, CrawlStats, Crawler};
use crate::error::{ErrorCode, Interrupted};
use crate::event::Event;
use crate::id::BlockHeight;
use crate::shutdown::Shutdown;
use crate::sink::{SinkPipeline, SinkStats, SpawnError};
use crate::source::EventSource;
use crate::store::{Cursors, EventLookup, Store, StoreError, StoreReader};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("cannot prepare the store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("cannot start crawler: {0}")]
    Crawler(#[source] std::io::Error),
}

impl IngestError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(_) => ErrorCode::StoreUnavailable,
            Self::Spawn(err) => err.code(),
            Self::Crawler(_) => ErrorCode::WorkerStartFailed,
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Present for crawl runs only.
    pub crawl: Option<CrawlStats>,
    pub buffer: BufferStats,
    pub sink: SinkStats,
    /// Events still waiting for parents when the run ended.
    pub pending: usize,
    /// Whether the run ended because of shutdown.
    pub interrupted: bool,
}

pub struct Ingest {
    config: DagwalkConfig,
    cursors: Cursors,
    cache: Arc<EpochWindow>,
    lookup: Arc<dyn EventLookup>,
    sink: SinkPipeline,
    shutdown: Shutdown,
}

impl Ingest {
    /// Open the read view, seed the cache from the store and start the sink.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the store cannot be read or a sink worker
    /// cannot be started.
    pub fn new<St: Store>(
        config: DagwalkConfig,
        store: &St,
        shutdown: Shutdown,
    ) -> Result<Self, IngestError> {
        let reader = store.reader()?;
        let cursors = reader.cursors()?;
        let retention = config.cache.retention;
        let cache = Arc::new(EpochWindow::new(retention, cursors.epoch));

        let oldest = cursors
            .epoch
            .saturating_sub(retention.saturating_sub(1))
            .max(1);
        let mut seeded = 0;
        for epoch in oldest..=cursors.epoch {
            seeded += cache.seed(epoch, reader.events_in_epoch(epoch)?);
        }
        info!(
            epoch = cursors.epoch,
            last_block = cursors.last_block,
            seeded,
            "cache seeded from store"
        );

        let sink = SinkPipeline::spawn(
            &config.sink,
            || store.writer(),
            cursors,
            Arc::clone(&cache),
            shutdown.clone(),
        )?;

        Ok(Self {
            config,
            cursors,
            cache,
            lookup: Arc::new(reader),
            sink,
            shutdown,
        })
    }

    /// Cursors as they were stored when this run started.
    #[must_use]
    pub const fn cursors(&self) -> Cursors {
        self.cursors
    }

    #[must_use]
    pub fn cache(&self) -> &EpochWindow {
        &self.cache
    }

    /// First block a live crawl should visit: the block after the stored
    /// cursor, but never before the configured start.
    #[must_use]
    pub fn start_height(&self) -> BlockHeight {
        (self.cursors.last_block + 1).max(self.config.crawler.dag_start)
    }

    fn buffer(&self) -> CausalBuffer<&SinkPipeline> {
        CausalBuffer::new(
            self.config.buffer,
            Arc::clone(&self.cache),
            Arc::clone(&self.lookup),
            &self.sink,
            self.shutdown.clone(),
        )
    }

    /// Crawl `source` and load everything it discovers.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Crawler`] if the crawler thread cannot start.
    pub fn run_crawl<S: EventSource + 'static>(
        self,
        source: S,
        mode: CrawlMode,
    ) -> Result<IngestReport, IngestError> {
        let (output, input) = bounded(self.config.crawler.output_capacity.max(1));
        let crawler = Crawler::new(
            source,
            self.config.crawler,
            Arc::clone(&self.cache),
            Arc::clone(&self.lookup),
            output,
            self.shutdown.clone(),
        );
        let handle = crawler.spawn(mode).map_err(IngestError::Crawler)?;

        let (buffer, interrupted) = {
            let mut buffer = self.buffer();
            let interrupted = loop {
                select! {
                    recv(input) -> event => match event {
                        Ok(event) => {
                            if push(&mut buffer, event).is_err() {
                                break true;
                            }
                        }
                        Err(_) => break false,
                    },
                    recv(self.shutdown.signal()) -> _ => break true,
                }
            };
            (finish_buffer(buffer), interrupted)
        };
        // A crawler blocked on a full output sees the disconnect.
        drop(input);

        let crawl = match handle.join() {
            Ok(stats) => stats,
            Err(_) => {
                error!("crawler thread panicked");
                CrawlStats::default()
            }
        };
        Ok(self.finish(Some(crawl), buffer, interrupted))
    }

    /// Load events from any iterator, typically a JSONL replay.
    ///
    /// # Errors
    ///
    /// Currently infallible once [`Ingest::new`] succeeded; the signature
    /// matches [`Ingest::run_crawl`].
    pub fn run_events<I>(self, events: I) -> Result<IngestReport, IngestError>
    where
        I: IntoIterator<Item = Event>,
    {
        let (buffer, interrupted) = {
            let mut buffer = self.buffer();
            let mut interrupted = false;
            for event in events {
                if push(&mut buffer, event).is_err() {
                    interrupted = true;
                    break;
                }
            }
            (finish_buffer(buffer), interrupted)
        };
        Ok(self.finish(None, buffer, interrupted))
    }

    fn finish(
        self,
        crawl: Option<CrawlStats>,
        buffer: BufferStats,
        interrupted: bool,
    ) -> IngestReport {
        self.sink.close();
        self.sink.wait_for_all();
        let interrupted = interrupted || self.shutdown.is_cancelled();
        let report = IngestReport {
            crawl,
            buffer,
            sink: self.sink.stats(),
            pending: buffer.buffered,
            interrupted,
        };
        info!(
            released = report.buffer.released,
            saved = report.sink.saved,
            failed = report.sink.failed,
            pending = report.pending,
            interrupted,
            "ingest finished"
        );
        report
    }
}

fn push(buffer: &mut CausalBuffer<&SinkPipeline>, event: Event) -> Result<(), Interrupted> {
    let id = event.id();
    match buffer.push(event)? {
        PushOutcome::Rejected => warn!(id = %id, "buffer full, event rejected"),
        outcome => debug!(id = %id, ?outcome, "event pushed"),
    }
    Ok(())
}

fn finish_buffer(mut buffer: CausalBuffer<&SinkPipeline>) -> BufferStats {
    let stats = buffer.stats();
    if stats.buffered > 0 {
        warn!(
            pending = stats.buffered,
            "events still waiting for parents were dropped"
        );
    }
    buffer.clear();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkConfig;
    use crate::event::Role;
    use crate::id::EventId;
    use crate::sink::DeliveryMode;
    use crate::source::MemorySource;
    use crate::store::{MemoryStore, StoreWriter};
    use crate::synth::{self, SynthConfig};

    fn acknowledged() -> DagwalkConfig {
        DagwalkConfig {
            sink: SinkConfig {
                mode: DeliveryMode::Acknowledged,
                ..SinkConfig::default()
            },
            ..DagwalkConfig::default()
        }
    }

    fn event(seq: u32, parents: Vec<EventId>) -> Event {
        let id = EventId::from_content(1, seq, &seq.to_be_bytes());
        Event::new(id, 0, parents).expect("valid event")
    }

    #[test]
    fn replay_stores_every_event_parents_first() {
        let store = MemoryStore::new();
        let dag = synth::generate(&SynthConfig {
            blocks: 4,
            blocks_per_epoch: 10,
            ..SynthConfig::default()
        })
        .expect("generate");
        let mixed = synth::shuffled(dag.events(), 11);

        let ingest = Ingest::new(acknowledged(), &store, Shutdown::new()).expect("ingest");
        let report = ingest.run_events(mixed).expect("run");

        assert_eq!(report.pending, 0);
        assert!(!report.interrupted);
        assert_eq!(report.sink.saved, dag.events().len() as u64);
        let order = store.record_order();
        for event in dag.events() {
            let at = order.iter().position(|id| *id == event.id()).expect("stored");
            for parent in event.parents() {
                let parent_at = order.iter().position(|id| id == parent).expect("parent");
                assert!(parent_at < at);
            }
        }
        assert_eq!(store.cursors().last_block, 4);
    }

    #[test]
    fn orphans_are_reported_as_pending() {
        let store = MemoryStore::new();
        let ghost = EventId::from_content(1, 99, b"ghost");
        let ingest = Ingest::new(acknowledged(), &store, Shutdown::new()).expect("ingest");
        let report = ingest
            .run_events(vec![event(1, vec![]), event(2, vec![ghost])])
            .expect("run");
        assert_eq!(report.pending, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn crawl_walks_a_range_of_blocks() {
        let store = MemoryStore::new();
        let dag = synth::generate(&SynthConfig {
            blocks: 3,
            ..SynthConfig::default()
        })
        .expect("generate");
        let ingest = Ingest::new(acknowledged(), &store, Shutdown::new()).expect("ingest");
        let report = ingest
            .run_crawl(dag.to_source(), CrawlMode::Range { from: 1, to: 3 })
            .expect("run");

        assert_eq!(report.crawl.map(|c| c.blocks), Some(3));
        assert_eq!(report.pending, 0);
        assert_eq!(store.len(), dag.events().len());
        assert_eq!(store.cursors().last_block, 3);
    }

    #[test]
    fn start_height_resumes_after_the_stored_block() {
        let mut store = MemoryStore::new();
        let config = DagwalkConfig::default();
        let ingest = Ingest::new(config.clone(), &store, Shutdown::new()).expect("ingest");
        assert_eq!(ingest.start_height(), config.crawler.dag_start.max(1));
        drop(ingest);

        store.set_last_block(41).expect("cursor");
        let ingest = Ingest::new(config, &store, Shutdown::new()).expect("ingest");
        assert_eq!(ingest.start_height(), 42);
    }

    #[test]
    fn cache_is_seeded_from_the_current_epoch() {
        let mut store = MemoryStore::new();
        let root = event(1, vec![]).with_block(1).with_role(Role::Atropos);
        store.insert_event(&root).expect("insert");
        store.insert_edges(&root).expect("edges");

        let ingest =
            Ingest::new(DagwalkConfig::default(), &store, Shutdown::new()).expect("ingest");
        assert!(ingest.cache().has(&root.id()));
        assert_eq!(ingest.cursors(), store.cursors());
    }

    #[test]
    fn cancelled_run_reports_interruption() {
        let store = MemoryStore::new();
        let shutdown = Shutdown::new();
        let ingest = Ingest::new(acknowledged(), &store, shutdown.clone()).expect("ingest");
        shutdown.cancel();
        let report = ingest.run_events(vec![event(1, vec![])]).expect("run");
        assert!(report.interrupted);
        assert!(store.is_empty());
    }

    #[test]
    fn cancelled_live_crawl_stops() {
        let store = MemoryStore::new();
        let shutdown = Shutdown::new();
        let ingest =
            Ingest::new(DagwalkConfig::default(), &store, shutdown.clone()).expect("ingest");
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            shutdown.cancel();
        });
        let report = ingest
            .run_crawl(MemorySource::default(), CrawlMode::Live { from: 1 })
            .expect("run");
        stopper.join().expect("stopper");
        assert!(report.interrupted);
    }
}
