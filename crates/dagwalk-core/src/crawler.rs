//! Backward discovery of unknown events.
//!
//! For each block the crawler resolves the block's atropos event and walks
//! parent pointers depth-first, emitting every event it has not seen before.
//! A branch is pruned as soon as it reaches an event that is
//! - already discovered in the current walk,
//! - part of the previous block's walk,
//! - resident in the [`EpochWindow`], or
//! - durable in the store.
//!
//! A transport failure abandons the block, drops the connection, waits the
//! retry delay and starts the same block again from scratch. Events emitted
//! by the abandoned attempt are emitted again; the buffer discards them.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, select};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::EpochWindow;
use crate::config::CrawlerConfig;
use crate::error::{ErrorCode, Interrupted};
use crate::event::{Event, Role};
use crate::id::{BlockHeight, EventId};
use crate::shutdown::Shutdown;
use crate::source::{EventSource, SourceError};
use crate::store::EventLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Crawl `from..=to`, then close the output.
    Range { from: BlockHeight, to: BlockHeight },
    /// Crawl from `from` and keep following the source's head.
    Live { from: BlockHeight },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub blocks: u64,
    pub emitted: u64,
    pub retries: u64,
    pub skipped: u64,
}

enum WalkError {
    Transport(SourceError),
    Interrupted,
}

impl From<Interrupted> for WalkError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

enum BlockOutcome {
    Walked,
    NotYetAvailable,
    /// The block itself cannot be read and is passed over for good.
    Skipped,
}

pub struct Crawler<S> {
    source: S,
    config: CrawlerConfig,
    cache: Arc<EpochWindow>,
    lookup: Arc<dyn EventLookup>,
    output: Sender<Event>,
    shutdown: Shutdown,
    previous: HashSet<EventId>,
    stats: CrawlStats,
}

impl<S: EventSource + 'static> Crawler<S> {
    #[must_use]
    pub fn new(
        source: S,
        config: CrawlerConfig,
        cache: Arc<EpochWindow>,
        lookup: Arc<dyn EventLookup>,
        output: Sender<Event>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            source,
            config,
            cache,
            lookup,
            output,
            shutdown,
            previous: HashSet::new(),
            stats: CrawlStats::default(),
        }
    }

    /// Run on a dedicated thread. The output closes when the thread ends.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be started.
    pub fn spawn(self, mode: CrawlMode) -> std::io::Result<JoinHandle<CrawlStats>> {
        std::thread::Builder::new()
            .name("dagwalk-crawler".to_string())
            .spawn(move || self.run(mode))
    }

    /// Crawl until the range is done or shutdown is requested.
    pub fn run(mut self, mode: CrawlMode) -> CrawlStats {
        let (mut height, end) = match mode {
            CrawlMode::Range { from, to } => (from, Some(to)),
            CrawlMode::Live { from } => (from, None),
        };
        info!(start = height, end = ?end, "crawler started");

        while !self.shutdown.is_cancelled() {
            if end.is_some_and(|end| height > end) {
                break;
            }
            let attempt = if end.is_none() {
                self.follow_head(height)
            } else {
                self.crawl_block(height)
            };

            match attempt {
                Ok(BlockOutcome::Walked) => {
                    self.stats.blocks += 1;
                    height += 1;
                }
                Ok(BlockOutcome::Skipped) => {
                    self.stats.skipped += 1;
                    height += 1;
                }
                Ok(BlockOutcome::NotYetAvailable) if end.is_some() => {
                    warn!(block = height, "block not available from source, skipping");
                    self.stats.skipped += 1;
                    height += 1;
                }
                Ok(BlockOutcome::NotYetAvailable) => {
                    if !self.shutdown.sleep(self.config.poll_interval()) {
                        break;
                    }
                }
                Err(WalkError::Transport(err)) => {
                    warn!(block = height, error = %err, code = %err.code(), "event source failed, retrying block");
                    self.stats.retries += 1;
                    self.source.disconnect();
                    if !self.shutdown.sleep(self.config.retry_delay()) {
                        break;
                    }
                }
                Err(WalkError::Interrupted) => break,
            }
        }

        let stats = self.stats;
        info!(
            blocks = stats.blocks,
            emitted = stats.emitted,
            retries = stats.retries,
            skipped = stats.skipped,
            next = height,
            "crawler stopped"
        );
        stats
    }

    /// Wait until the source's head reaches `height`, then walk it.
    fn follow_head(&mut self, height: BlockHeight) -> Result<BlockOutcome, WalkError> {
        let head = self.source.latest_block().map_err(WalkError::Transport)?;
        if head < height {
            debug!(head, next = height, "waiting for new blocks");
            return Ok(BlockOutcome::NotYetAvailable);
        }
        self.crawl_block(height)
    }

    fn crawl_block(&mut self, height: BlockHeight) -> Result<BlockOutcome, WalkError> {
        let atropos = match self.source.block_atropos(height) {
            Ok(Some(atropos)) => atropos,
            Ok(None) => return Ok(BlockOutcome::NotYetAvailable),
            Err(err) if err.is_transient() => return Err(WalkError::Transport(err)),
            Err(err) => {
                error!(
                    block = height,
                    error = %err,
                    code = %err.code(),
                    "undecodable block skipped permanently; import it again once the source serves it"
                );
                return Ok(BlockOutcome::Skipped);
            }
        };
        info!(block = height, atropos = %atropos.full_id(), "new block");

        let mut discovered = HashSet::from([atropos]);
        if self.is_known(&atropos) {
            debug!(block = height, "atropos already known");
            self.previous = discovered;
            return Ok(BlockOutcome::Walked);
        }

        let mut stack = vec![atropos];
        while let Some(id) = stack.pop() {
            let Some(event) = self.fetch(height, &id)? else {
                continue;
            };
            let parents = event.parents().to_vec();
            let mut tagged = event.with_block(height);
            if id == atropos {
                tagged = tagged.with_role(Role::Atropos);
            }
            self.emit(tagged)?;

            for parent in parents {
                // Known parents stay in `discovered` so the next block's
                // walk prunes them without another lookup.
                if !discovered.insert(parent)
                    || self.previous.contains(&parent)
                    || self.is_known(&parent)
                {
                    continue;
                }
                stack.push(parent);
            }
        }

        self.previous = discovered;
        Ok(BlockOutcome::Walked)
    }

    /// Fetch one event. Missing or malformed data skips the branch.
    fn fetch(&mut self, height: BlockHeight, id: &EventId) -> Result<Option<Event>, WalkError> {
        let reason = match self.source.get_event(id) {
            Ok(Some(event)) if event.id() == *id => return Ok(Some(event)),
            Ok(Some(event)) => format!("source answered with {}", event.id()),
            Ok(None) => {
                error!(%id, block = height, code = %ErrorCode::SourceMissingData, "event missing from source, skipping branch");
                self.stats.skipped += 1;
                return Ok(None);
            }
            Err(err) if err.is_transient() => return Err(WalkError::Transport(err)),
            Err(err) => err.to_string(),
        };
        error!(%id, block = height, error = %reason, code = %ErrorCode::MalformedEvent, "malformed event, skipping branch");
        self.stats.skipped += 1;
        Ok(None)
    }

    fn emit(&mut self, event: Event) -> Result<(), WalkError> {
        if self.shutdown.is_cancelled() {
            return Err(WalkError::Interrupted);
        }
        let id = event.id();
        select! {
            send(self.output, event) -> sent => sent.map_err(|_| Interrupted)?,
            recv(self.shutdown.signal()) -> _ => return Err(WalkError::Interrupted),
        }
        self.stats.emitted += 1;
        debug!(%id, "event discovered");
        Ok(())
    }

    fn is_known(&self, id: &EventId) -> bool {
        if self.cache.has(id) {
            return true;
        }
        match self.lookup.has_event(id) {
            Ok(found) => found,
            Err(err) => {
                warn!(%id, error = %err, "store lookup failed, treating as unknown");
                false
            }
        }
    }
}
