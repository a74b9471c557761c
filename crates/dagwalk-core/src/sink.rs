//! Two-stage persistence pipeline.
//!
//! ```text
//! save() ──queue──▶ record worker ──queue──▶ edge worker ──▶ cache + completion
//!                   insert_event              insert_edges
//!                                             set_epoch / set_last_block
//! ```
//!
//! Both queues are bounded, so a slow store pushes back on `save`. Each
//! worker owns its own [`StoreWriter`]. For any one event the record is
//! written before its edges because both stages are FIFO.
//!
//! A failed write is logged, the event is skipped, and its completion
//! carries the error. The pipeline keeps going. An event only counts as
//! stored once its edge write succeeds, so a skipped event is fetched again
//! by a later run.
//!
//! On shutdown the record worker stops taking new events. The edge worker
//! keeps going until every event whose record was written has its edges.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::buffer::EventSink;
use crate::cache::EpochWindow;
use crate::config::SinkConfig;
use crate::error::{ErrorCode, Interrupted};
use crate::event::Event;
use crate::id::EventId;
use crate::shutdown::Shutdown;
use crate::store::{Cursors, StoreError, StoreWriter};

/// How [`SinkPipeline::save`] relates to durability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Return once the event is queued.
    #[default]
    FireAndForget,
    /// Return once the record and every parent edge are durable.
    Acknowledged,
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("event {id} was not stored: {source}")]
    Persistence {
        id: EventId,
        #[source]
        source: StoreError,
    },
}

impl SaveError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Interrupted(_) => ErrorCode::Interrupted,
            Self::Persistence { source, .. } => source.code(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("cannot open sink writer: {0}")]
    Writer(#[from] StoreError),

    #[error("cannot start sink worker: {0}")]
    Thread(#[from] std::io::Error),
}

impl SpawnError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Writer(err) => err.code(),
            Self::Thread(_) => ErrorCode::WorkerStartFailed,
        }
    }
}

type Completion = Sender<Result<(), StoreError>>;

/// One event travelling through the pipeline.
struct PendingTask {
    event: Event,
    completion: Option<Completion>,
}

impl PendingTask {
    fn complete(self, outcome: Result<(), StoreError>) {
        notify(self.completion, outcome);
    }
}

fn notify(completion: Option<Completion>, outcome: Result<(), StoreError>) {
    if let Some(completion) = completion {
        // The waiter may have given up on shutdown.
        let _ = completion.send(outcome);
    }
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    saved: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub queued: u64,
    pub saved: u64,
    pub failed: u64,
}

pub struct SinkPipeline {
    mode: DeliveryMode,
    queue: Mutex<Option<Sender<PendingTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    shutdown: Shutdown,
}

impl SinkPipeline {
    /// Open two writers with `open_writer` and start both workers.
    ///
    /// `cursors` are the values currently stored; the edge worker only ever
    /// raises them.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] if a writer cannot be opened or a worker
    /// thread cannot be started.
    pub fn spawn<W, F>(
        config: &SinkConfig,
        open_writer: F,
        cursors: Cursors,
        cache: Arc<EpochWindow>,
        shutdown: Shutdown,
    ) -> Result<Self, SpawnError>
    where
        W: StoreWriter + 'static,
        F: Fn() -> Result<W, StoreError>,
    {
        let record_writer = open_writer()?;
        let edge_writer = open_writer()?;
        let capacity = config.queue_capacity.max(1);
        let (queue_tx, queue_rx) = bounded(capacity);
        let (edge_tx, edge_rx) = bounded(capacity);
        let counters = Arc::new(Counters::default());

        let record = RecordWorker {
            writer: record_writer,
            input: queue_rx,
            output: edge_tx,
            counters: Arc::clone(&counters),
            shutdown: shutdown.clone(),
        };
        let edges = EdgeWorker {
            writer: edge_writer,
            input: edge_rx,
            cursors,
            cache,
            counters: Arc::clone(&counters),
            shutdown: shutdown.clone(),
            progress: Progress::new(config.progress_interval()),
        };

        let edge_handle = std::thread::Builder::new()
            .name("dagwalk-sink-edges".to_string())
            .spawn(move || edges.run())?;
        let record_handle = std::thread::Builder::new()
            .name("dagwalk-sink-record".to_string())
            .spawn(move || record.run())?;
        debug!(mode = ?config.mode, capacity, "sink pipeline started");

        Ok(Self {
            mode: config.mode,
            queue: Mutex::new(Some(queue_tx)),
            workers: Mutex::new(vec![record_handle, edge_handle]),
            counters,
            shutdown,
        })
    }

    #[must_use]
    pub const fn mode(&self) -> DeliveryMode {
        self.mode
    }

    fn queue(&self) -> MutexGuard<'_, Option<Sender<PendingTask>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand one event to the pipeline according to the delivery mode.
    ///
    /// # Errors
    ///
    /// Returns [`SaveError::Interrupted`] after shutdown or [`close`], and
    /// in acknowledged mode [`SaveError::Persistence`] if the event was
    /// skipped.
    ///
    /// [`close`]: SinkPipeline::close
    pub fn save(&self, event: Event) -> Result<(), SaveError> {
        if self.shutdown.is_cancelled() {
            return Err(Interrupted.into());
        }
        let Some(queue) = self.queue().clone() else {
            return Err(Interrupted.into());
        };

        let id = event.id();
        let (completion, done) = match self.mode {
            DeliveryMode::FireAndForget => (None, None),
            DeliveryMode::Acknowledged => {
                let (tx, rx) = bounded(1);
                (Some(tx), Some(rx))
            }
        };

        let task = PendingTask { event, completion };
        select! {
            send(queue, task) -> sent => sent.map_err(|_| Interrupted)?,
            recv(self.shutdown.signal()) -> _ => return Err(Interrupted.into()),
        }
        self.counters.queued.fetch_add(1, Ordering::Relaxed);

        let Some(done) = done else {
            return Ok(());
        };
        select! {
            recv(done) -> outcome => match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(source)) => Err(SaveError::Persistence { id, source }),
                Err(_) => Err(Interrupted.into()),
            },
            recv(self.shutdown.signal()) -> _ => Err(Interrupted.into()),
        }
    }

    /// Stop accepting events. Queued events are still written.
    pub fn close(&self) {
        if self.queue().take().is_some() {
            debug!("sink queue closed");
        }
    }

    /// Block until both workers have drained their queues and exited.
    ///
    /// Only returns promptly after [`close`](SinkPipeline::close) or shutdown.
    pub fn wait_for_all(&self) {
        let handles: Vec<_> = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            workers.drain(..).collect()
        };
        for handle in handles {
            let name = handle.thread().name().unwrap_or("sink").to_string();
            if handle.join().is_err() {
                error!(worker = %name, "sink worker panicked");
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> SinkStats {
        SinkStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            saved: self.counters.saved.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SinkPipeline {
    fn drop(&mut self) {
        self.close();
        self.wait_for_all();
    }
}

impl EventSink for SinkPipeline {
    /// Persistence failures are already logged by the workers and do not
    /// stop the buffer. The skipped event stays invisible to lookups.
    fn deliver(&self, event: Event) -> Result<(), Interrupted> {
        match self.save(event) {
            Ok(()) | Err(SaveError::Persistence { .. }) => Ok(()),
            Err(SaveError::Interrupted(interrupted)) => Err(interrupted),
        }
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

struct RecordWorker<W> {
    writer: W,
    input: Receiver<PendingTask>,
    output: Sender<PendingTask>,
    counters: Arc<Counters>,
    shutdown: Shutdown,
}

impl<W: StoreWriter> RecordWorker<W> {
    fn run(mut self) {
        loop {
            let task = select! {
                recv(self.input) -> task => match task {
                    Ok(task) => task,
                    Err(_) => break,
                },
                recv(self.shutdown.signal()) -> _ => break,
            };

            if let Err(err) = self.writer.insert_event(&task.event) {
                error!(id = %task.event.id(), error = %err, code = %err.code(), "event record write failed, skipping");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                task.complete(Err(err));
                continue;
            }

            // The edge worker drains until this sender is dropped.
            if self.output.send(task).is_err() {
                error!("sink edge worker is gone");
                break;
            }
        }
        debug!("sink record worker stopped");
    }
}

struct EdgeWorker<W> {
    writer: W,
    input: Receiver<PendingTask>,
    cursors: Cursors,
    cache: Arc<EpochWindow>,
    counters: Arc<Counters>,
    shutdown: Shutdown,
    progress: Progress,
}

impl<W: StoreWriter> EdgeWorker<W> {
    /// Runs until the record worker hangs up, even after cancellation.
    fn run(mut self) {
        let mut drained = 0_u64;
        while let Ok(task) = self.input.recv() {
            if self.shutdown.is_cancelled() {
                drained += 1;
            }
            self.store(task);
        }
        if drained > 0 {
            info!(drained, "edges completed after shutdown");
        }
        self.progress.finish(&self.counters);
    }

    fn store(&mut self, task: PendingTask) {
        let PendingTask { event, completion } = task;
        let id = event.id();

        if let Err(err) = self.writer.insert_edges(&event) {
            error!(%id, error = %err, code = %err.code(), "event edge write failed, skipping");
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            notify(completion, Err(err));
            return;
        }

        self.advance_cursors(&event);
        self.cache.put(event);
        self.counters.saved.fetch_add(1, Ordering::Relaxed);
        self.progress.record(id, &self.counters);
        notify(completion, Ok(()));
    }

    fn advance_cursors(&mut self, event: &Event) {
        let epoch = event.epoch();
        if epoch > self.cursors.epoch {
            match self.writer.set_epoch(epoch) {
                Ok(()) => {
                    info!(from = self.cursors.epoch, to = epoch, "epoch cursor advanced");
                    self.cursors.epoch = epoch;
                }
                Err(err) => warn!(epoch, error = %err, "epoch cursor not advanced"),
            }
        }

        if let (true, Some(block)) = (event.is_atropos(), event.block())
            && block > self.cursors.last_block
        {
            match self.writer.set_last_block(block) {
                Ok(()) => self.cursors.last_block = block,
                Err(err) => warn!(block, error = %err, "block cursor not advanced"),
            }
        }
    }
}

/// Throughput reporting for the edge worker.
struct Progress {
    interval: Duration,
    started: Instant,
    reported_at: Instant,
    reported_total: u64,
}

impl Progress {
    fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            started: now,
            reported_at: now,
            reported_total: 0,
        }
    }

    fn record(&mut self, last: EventId, counters: &Counters) {
        let elapsed = self.reported_at.elapsed();
        if elapsed < self.interval {
            return;
        }
        let total = counters.saved.load(Ordering::Relaxed);
        let rate = rate_per_sec(total - self.reported_total, elapsed);
        info!(total, rate = %format!("{rate:.1}/s"), last = %last.full_id(), "sink progress");
        self.reported_at = Instant::now();
        self.reported_total = total;
    }

    fn finish(&self, counters: &Counters) {
        let saved = counters.saved.load(Ordering::Relaxed);
        let failed = counters.failed.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed();
        let rate = rate_per_sec(saved, elapsed);
        info!(saved, failed, elapsed_ms = elapsed.as_millis(), rate = %format!("{rate:.1}/s"), "sink stopped");
    }
}

#[allow(clippy::cast_precision_loss)]
fn rate_per_sec(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return 0.0;
    }
    count as f64 / secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Role;
    use crate::id::Epoch;
    use crate::store::{EventLookup, MemoryStore, SqliteStore};

    fn id(epoch: Epoch, seq: u32, tag: &str) -> EventId {
        EventId::from_content(epoch, seq, tag.as_bytes())
    }

    fn event(id: EventId, parents: &[EventId]) -> Event {
        Event::new(id, 0, parents.to_vec()).expect("valid event")
    }

    fn config(mode: DeliveryMode) -> SinkConfig {
        SinkConfig {
            mode,
            ..SinkConfig::default()
        }
    }

    /// Delegates to a [`MemoryStore`] but takes `delay` for every edge write.
    #[derive(Clone)]
    struct SlowEdges {
        inner: MemoryStore,
        delay: Duration,
        started: Option<Sender<()>>,
    }

    impl SlowEdges {
        fn new(store: &MemoryStore, delay: Duration) -> Self {
            Self {
                inner: store.clone(),
                delay,
                started: None,
            }
        }

        fn notify(mut self, started: Sender<()>) -> Self {
            self.started = Some(started);
            self
        }
    }

    impl StoreWriter for SlowEdges {
        fn insert_event(&mut self, event: &Event) -> Result<(), StoreError> {
            self.inner.insert_event(event)
        }

        fn insert_edges(&mut self, event: &Event) -> Result<(), StoreError> {
            if let Some(started) = &self.started {
                let _ = started.try_send(());
            }
            std::thread::sleep(self.delay);
            self.inner.insert_edges(event)
        }

        fn set_epoch(&mut self, epoch: Epoch) -> Result<(), StoreError> {
            self.inner.set_epoch(epoch)
        }

        fn set_last_block(&mut self, block: crate::id::BlockHeight) -> Result<(), StoreError> {
            self.inner.set_last_block(block)
        }
    }

    fn memory_sink(
        mode: DeliveryMode,
        store: &MemoryStore,
    ) -> (SinkPipeline, Arc<EpochWindow>, Shutdown) {
        let cache = Arc::new(EpochWindow::new(2, 1));
        let shutdown = Shutdown::new();
        let writer = store.clone();
        let sink = SinkPipeline::spawn(
            &config(mode),
            move || Ok(writer.clone()),
            Cursors::default(),
            Arc::clone(&cache),
            shutdown.clone(),
        )
        .expect("spawn sink");
        (sink, cache, shutdown)
    }

    #[test]
    fn fire_and_forget_drains_on_close() {
        let store = MemoryStore::new();
        let (sink, cache, _shutdown) = memory_sink(DeliveryMode::FireAndForget, &store);
        let a = event(id(1, 1, "a"), &[]);
        let b = event(id(1, 2, "b"), &[a.id()]);
        let c = event(id(1, 3, "c"), &[a.id(), b.id()]);
        for e in [&a, &b, &c] {
            sink.save(e.clone()).expect("save");
        }
        sink.close();
        sink.wait_for_all();

        assert_eq!(store.record_order(), vec![a.id(), b.id(), c.id()]);
        assert_eq!(store.edges_of(&c.id()), Some(vec![a.id(), b.id()]));
        assert!(cache.has(&c.id()));
        assert_eq!(
            sink.stats(),
            SinkStats {
                queued: 3,
                saved: 3,
                failed: 0
            }
        );
    }

    #[test]
    fn acknowledged_save_is_visible_to_a_separate_reader() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SqliteStore::open(dir.path().join("dag.sqlite3")).expect("open");
        let reader = store.reader().expect("reader");
        let cache = Arc::new(EpochWindow::new(2, 1));
        let writers = store.clone();
        let sink = SinkPipeline::spawn(
            &config(DeliveryMode::Acknowledged),
            move || writers.writer(),
            Cursors::default(),
            Arc::clone(&cache),
            Shutdown::new(),
        )
        .expect("spawn sink");

        let a = event(id(1, 1, "a"), &[]);
        let b = event(id(1, 2, "b"), &[a.id()]);
        sink.save(a.clone()).expect("save a");
        assert!(reader.has_event(&a.id()).expect("has a"));
        sink.save(b.clone()).expect("save b");
        assert_eq!(reader.get_event(&b.id()).expect("get b"), Some(b.clone()));
        assert_eq!(reader.edge_count().expect("edges"), 1);
        assert!(cache.has(&b.id()));
    }

    #[test]
    fn failed_record_is_skipped_and_pipeline_continues() {
        let store = MemoryStore::new();
        let (sink, cache, _shutdown) = memory_sink(DeliveryMode::Acknowledged, &store);
        let a = event(id(1, 1, "a"), &[]);
        let bad = event(id(1, 2, "bad"), &[a.id()]);
        let c = event(id(1, 3, "c"), &[a.id()]);
        store.fail_on(bad.id());

        sink.save(a).expect("save a");
        let err = sink.save(bad.clone()).expect_err("rejected");
        assert!(matches!(err, SaveError::Persistence { id, .. } if id == bad.id()));
        assert_eq!(err.code(), ErrorCode::PersistenceFailure);
        sink.save(c.clone()).expect("save c");

        assert!(!cache.has(&bad.id()));
        assert!(cache.has(&c.id()));
        let stats = sink.stats();
        assert_eq!((stats.saved, stats.failed), (2, 1));
    }

    #[test]
    fn failed_edges_leave_the_event_unstored() {
        let store = MemoryStore::new();
        let (sink, cache, _shutdown) = memory_sink(DeliveryMode::Acknowledged, &store);
        let missing = event(id(1, 1, "late"), &[]);
        let orphan = event(id(1, 2, "orphan"), &[missing.id()]);

        let err = sink.save(orphan.clone()).expect_err("edge rejected");
        assert!(matches!(err, SaveError::Persistence { .. }));
        assert_eq!(store.record_order(), vec![orphan.id()]);
        assert!(!store.has_event(&orphan.id()).expect("has"));
        assert_eq!(store.get_event(&orphan.id()).expect("get"), None);
        assert!(!cache.has(&orphan.id()));

        sink.save(missing).expect("save parent");
        sink.save(orphan.clone()).expect("retry");
        assert!(store.has_event(&orphan.id()).expect("has"));
    }

    #[test]
    fn child_of_a_skipped_event_is_skipped_too() {
        let store = MemoryStore::new();
        let (sink, _cache, _shutdown) = memory_sink(DeliveryMode::FireAndForget, &store);
        let ghost = id(1, 1, "ghost");
        let broken = event(id(1, 2, "broken"), &[ghost]);
        let child = event(id(1, 3, "child"), &[broken.id()]);
        sink.deliver(broken.clone()).expect("deliver");
        sink.deliver(child.clone()).expect("deliver");
        sink.close();
        sink.wait_for_all();

        assert_eq!(store.record_order(), vec![broken.id(), child.id()]);
        assert!(!store.has_event(&broken.id()).expect("has"));
        assert!(!store.has_event(&child.id()).expect("has"));
        assert_eq!(sink.stats().failed, 2);
    }

    #[test]
    fn shutdown_finishes_edges_of_every_written_record() {
        let store = MemoryStore::new();
        let shutdown = Shutdown::new();
        let writer = SlowEdges::new(&store, Duration::from_millis(20));
        let sink = SinkPipeline::spawn(
            &config(DeliveryMode::FireAndForget),
            move || Ok(writer.clone()),
            Cursors::default(),
            Arc::new(EpochWindow::new(2, 1)),
            shutdown.clone(),
        )
        .expect("spawn sink");

        let mut parent = None;
        for seq in 1..=15 {
            let parents: Vec<EventId> = parent.into_iter().collect();
            let e = event(id(1, seq, &format!("e{seq}")), &parents);
            parent = Some(e.id());
            sink.save(e).expect("save");
        }
        shutdown.cancel();
        sink.wait_for_all();

        let written = store.record_order();
        assert!(!written.is_empty());
        for id in &written {
            assert!(store.edges_of(id).is_some(), "{id} has no edges");
            assert!(store.has_event(id).expect("has"));
        }
        assert_eq!(store.len(), written.len());
    }

    #[test]
    fn blocked_acknowledged_save_is_interrupted_by_cancel() {
        let store = MemoryStore::new();
        let shutdown = Shutdown::new();
        let (started_tx, started_rx) = bounded(1);
        let writer = SlowEdges::new(&store, Duration::from_millis(1500)).notify(started_tx);
        let sink = SinkPipeline::spawn(
            &config(DeliveryMode::Acknowledged),
            move || Ok(writer.clone()),
            Cursors::default(),
            Arc::new(EpochWindow::new(2, 1)),
            shutdown.clone(),
        )
        .expect("spawn sink");
        let sink = Arc::new(sink);

        let saver = {
            let sink = Arc::clone(&sink);
            std::thread::spawn(move || {
                let started = Instant::now();
                let outcome = sink.save(event(id(1, 1, "slow"), &[]));
                (outcome, started.elapsed())
            })
        };
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("edge write started");
        shutdown.cancel();

        let (outcome, elapsed) = saver.join().expect("saver thread");
        assert!(matches!(outcome, Err(SaveError::Interrupted(_))));
        assert!(elapsed < Duration::from_millis(1000), "{elapsed:?}");
    }

    #[test]
    fn cursors_advance_on_new_epoch_and_atropos() {
        let store = MemoryStore::new();
        let (sink, _cache, _shutdown) = memory_sink(DeliveryMode::Acknowledged, &store);
        let a = event(id(1, 1, "a"), &[]).with_block(3);
        let b = event(id(2, 1, "b"), &[a.id()])
            .with_block(4)
            .with_role(Role::Atropos);
        let c = event(id(2, 2, "c"), &[b.id()]).with_block(9);

        sink.save(a).expect("save");
        assert_eq!(store.cursors(), Cursors { epoch: 1, last_block: 0 });
        sink.save(b).expect("save");
        sink.save(c).expect("save");
        assert_eq!(store.cursors(), Cursors { epoch: 2, last_block: 4 });
    }

    #[test]
    fn save_after_close_or_cancel_is_interrupted() {
        let store = MemoryStore::new();
        let (sink, _cache, shutdown) = memory_sink(DeliveryMode::Acknowledged, &store);
        sink.close();
        sink.close();
        let err = sink.save(event(id(1, 1, "a"), &[])).expect_err("closed");
        assert!(matches!(err, SaveError::Interrupted(_)));

        drop(sink);
        drop(shutdown);

        let (sink, _cache, shutdown) = memory_sink(DeliveryMode::FireAndForget, &store);
        shutdown.cancel();
        let err = sink.save(event(id(1, 2, "b"), &[])).expect_err("cancelled");
        assert_eq!(err.code(), ErrorCode::Interrupted);
        sink.wait_for_all();
    }

    #[test]
    fn deliver_swallows_persistence_errors() {
        let store = MemoryStore::new();
        let (sink, _cache, _shutdown) = memory_sink(DeliveryMode::Acknowledged, &store);
        let bad = event(id(1, 1, "bad"), &[]);
        store.fail_on(bad.id());
        assert_eq!(sink.deliver(bad), Ok(()));
        assert_eq!(sink.stats().failed, 1);
    }

    #[test]
    fn writer_open_failure_is_fatal() {
        let result = SinkPipeline::spawn(
            &SinkConfig::default(),
            || -> Result<MemoryStore, StoreError> {
                Err(StoreError::Missing {
                    path: "absent.db".into(),
                })
            },
            Cursors::default(),
            Arc::new(EpochWindow::new(2, 1)),
            Shutdown::new(),
        );
        let err = result.err().expect("spawn must fail");
        assert_eq!(err.code(), ErrorCode::StoreUnavailable);
    }
}
