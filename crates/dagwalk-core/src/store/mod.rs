//! Durable event graph storage.
//!
//! The pipeline talks to storage through two capability traits:
//! - [`EventLookup`] is the read side, shared by the crawler and the buffer
//! - [`StoreWriter`] is the write side, owned exclusively by one sink worker
//!
//! [`SqliteStore`] is the production adapter. [`MemoryStore`] keeps the same
//! contract in process memory and can be told to fail writes for chosen ids.
//!
//! Runtime defaults for SQLite connections:
//! - `journal_mode = WAL` so the read view never blocks the sink workers
//! - `busy_timeout = 5s` to absorb short lock contention between workers
//! - `foreign_keys = ON` so an edge can never reference a missing event

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ErrorCode;
use crate::event::Event;
use crate::id::{BlockHeight, Epoch, EventId};

pub use memory::MemoryStore;
pub use sqlite::{SqliteReader, SqliteStore, SqliteWriter};

/// Errors raised by store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no store at {}", path.display())]
    Missing { path: PathBuf },

    #[error("cannot create store directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open store {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("store migration failed: {0}")]
    Migrate(#[source] rusqlite::Error),

    #[error("store {} has schema version {found}, expected {expected}", path.display())]
    Outdated {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored row for {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("{column} value {value} does not fit the store")]
    OutOfRange { column: &'static str, value: u64 },

    #[error("write rejected for {0}")]
    Rejected(EventId),
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Missing { .. }
            | Self::Directory { .. }
            | Self::Open { .. }
            | Self::Migrate(_)
            | Self::Outdated { .. } => ErrorCode::StoreUnavailable,
            Self::Corrupt { .. } => ErrorCode::MalformedEvent,
            Self::Sqlite(_) | Self::OutOfRange { .. } | Self::Rejected(_) => {
                ErrorCode::PersistenceFailure
            }
        }
    }
}

/// Persisted progress markers, stored as one singleton row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    /// Newest epoch the store has seen an event for.
    pub epoch: Epoch,
    /// Highest block whose atropos event has been fully stored.
    pub last_block: BlockHeight,
}

impl Default for Cursors {
    fn default() -> Self {
        Self {
            epoch: 1,
            last_block: 0,
        }
    }
}

/// Read-only view of durable events.
pub trait EventLookup: Send + Sync {
    /// Whether `id` is durable: its record and all of its parent edges
    /// are stored. A record on its own does not count.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be queried.
    fn has_event(&self, id: &EventId) -> Result<bool, StoreError>;

    /// Load a durable event with its parents in their original order.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be queried or the stored
    /// row does not decode.
    fn get_event(&self, id: &EventId) -> Result<Option<Event>, StoreError>;
}

impl<T: EventLookup + ?Sized> EventLookup for Arc<T> {
    fn has_event(&self, id: &EventId) -> Result<bool, StoreError> {
        (**self).has_event(id)
    }

    fn get_event(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        (**self).get_event(id)
    }
}

/// Read view with the queries needed at startup.
pub trait StoreReader: EventLookup {
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the cursor row cannot be read.
    fn cursors(&self) -> Result<Cursors, StoreError>;

    /// All stored events of `epoch`, ordered by sequence.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails or a row is corrupt.
    fn events_in_epoch(&self, epoch: Epoch) -> Result<Vec<Event>, StoreError>;
}

/// A store that hands out independent read and write handles.
pub trait Store {
    type Reader: StoreReader + 'static;
    type Writer: StoreWriter + 'static;

    /// # Errors
    ///
    /// Returns a [`StoreError`] if the handle cannot be opened.
    fn reader(&self) -> Result<Self::Reader, StoreError>;

    /// # Errors
    ///
    /// Returns a [`StoreError`] if the handle cannot be opened.
    fn writer(&self) -> Result<Self::Writer, StoreError>;
}

/// Write side of the store. Each sink worker owns one writer.
pub trait StoreWriter: Send {
    /// Persist the event record. Re-inserting a stored id is a no-op. The
    /// event stays invisible to lookups until [`insert_edges`] succeeds.
    ///
    /// [`insert_edges`]: StoreWriter::insert_edges
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn insert_event(&mut self, event: &Event) -> Result<(), StoreError>;

    /// Persist every parent edge of `event` and mark it complete, atomically.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the record is missing, a parent is not
    /// durable, or an edge cannot be written; no edge of the event is kept
    /// then.
    fn insert_edges(&mut self, event: &Event) -> Result<(), StoreError>;

    /// Raise the epoch cursor. Lower values are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn set_epoch(&mut self, epoch: Epoch) -> Result<(), StoreError>;

    /// Raise the last-block cursor. Lower values are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn set_last_block(&mut self, block: BlockHeight) -> Result<(), StoreError>;
}

impl<T: StoreWriter + ?Sized> StoreWriter for Box<T> {
    fn insert_event(&mut self, event: &Event) -> Result<(), StoreError> {
        (**self).insert_event(event)
    }

    fn insert_edges(&mut self, event: &Event) -> Result<(), StoreError> {
        (**self).insert_edges(event)
    }

    fn set_epoch(&mut self, epoch: Epoch) -> Result<(), StoreError> {
        (**self).set_epoch(epoch)
    }

    fn set_last_block(&mut self, block: BlockHeight) -> Result<(), StoreError> {
        (**self).set_last_block(block)
    }
}
