//! SQLite adapter for the event graph store.
//!
//! [`SqliteStore`] is only a handle to the database path; every consumer
//! opens its own connection. The sink workers each own a [`SqliteWriter`],
//! the crawler and buffer share one [`SqliteReader`].
//!
//! Readers only see events with `complete = 1`. The flag is set in the
//! transaction that writes the parent edges, so a record whose edges never
//! landed is invisible and gets fetched again on the next run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use tracing::{debug, info};

use super::{Cursors, EventLookup, Store, StoreError, StoreReader, StoreWriter, migrations};
use crate::event::{Event, Role};
use crate::id::{BlockHeight, Epoch, EventId, ValidatorId};

/// Busy timeout used for every store connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to an on-disk event graph database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database and migrate it to the latest schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Directory`], [`StoreError::Open`] or
    /// [`StoreError::Migrate`] if the database cannot be prepared.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = connect(&path, false)?;
        let version = migrations::upgrade(&mut conn).map_err(StoreError::Migrate)?;
        info!(path = %path.display(), version, "store ready");
        Ok(Self { path })
    }

    /// Open an existing database for queries only.
    ///
    /// Nothing is written: no migration runs and the journal mode is left
    /// as the sink set it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] if there is no file at `path`,
    /// [`StoreError::Open`] if it cannot be opened, or
    /// [`StoreError::Outdated`] if it was never upgraded to this layout.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<SqliteReader, StoreError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StoreError::Missing {
                path: path.to_path_buf(),
            });
        }
        let open_error = |source: rusqlite::Error| StoreError::Open {
            path: path.to_path_buf(),
            source,
        };
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(open_error)?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT).map_err(open_error)?;
        conn.pragma_update(None, "query_only", "ON").map_err(open_error)?;

        let found = migrations::schema_version(&conn).map_err(open_error)?;
        if found != migrations::LATEST_SCHEMA_VERSION {
            return Err(StoreError::Outdated {
                path: path.to_path_buf(),
                found,
                expected: migrations::LATEST_SCHEMA_VERSION,
            });
        }
        debug!(path = %path.display(), "store opened read-only");
        Ok(SqliteReader {
            conn: Mutex::new(conn),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a query-only connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the connection cannot be established.
    pub fn reader(&self) -> Result<SqliteReader, StoreError> {
        let conn = connect(&self.path, true)?;
        Ok(SqliteReader {
            conn: Mutex::new(conn),
        })
    }

    /// Open a write connection for one sink worker.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the connection cannot be established.
    pub fn writer(&self) -> Result<SqliteWriter, StoreError> {
        Ok(SqliteWriter {
            conn: connect(&self.path, false)?,
        })
    }
}

impl Store for SqliteStore {
    type Reader = SqliteReader;
    type Writer = SqliteWriter;

    fn reader(&self) -> Result<SqliteReader, StoreError> {
        Self::reader(self)
    }

    fn writer(&self) -> Result<SqliteWriter, StoreError> {
        Self::writer(self)
    }
}

fn connect(path: &Path, query_only: bool) -> Result<Connection, StoreError> {
    let open_error = |source: rusqlite::Error| StoreError::Open {
        path: path.to_path_buf(),
        source,
    };
    let conn = Connection::open_with_flags(path, OpenFlags::default()).map_err(open_error)?;
    configure_connection(&conn, query_only).map_err(open_error)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection, query_only: bool) -> rusqlite::Result<()> {
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if query_only {
        conn.pragma_update(None, "query_only", "ON")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

const EVENT_COLUMNS: &str = "id, creator, block, role";

struct EventRow {
    id: String,
    creator: i64,
    block: Option<i64>,
    role: Option<String>,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            creator: row.get(1)?,
            block: row.get(2)?,
            role: row.get(3)?,
        })
    }

    fn decode(self, parents: &[String]) -> Result<Event, StoreError> {
        let Self {
            id: text,
            creator,
            block,
            role,
        } = self;
        let corrupt = |reason: String| StoreError::Corrupt {
            id: text.clone(),
            reason,
        };

        let id: EventId = text.parse().map_err(|e: crate::id::IdError| corrupt(e.to_string()))?;
        let creator = ValidatorId::try_from(creator).map_err(|e| corrupt(e.to_string()))?;
        let parents = parents
            .iter()
            .map(|p| p.parse::<EventId>().map_err(|e| corrupt(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let mut event = Event::new(id, creator, parents).map_err(|e| corrupt(e.to_string()))?;
        if let Some(block) = block {
            let block = BlockHeight::try_from(block).map_err(|e| corrupt(e.to_string()))?;
            event = event.with_block(block);
        }
        if let Some(role) = role {
            let role: Role = role.parse().map_err(|e: crate::event::EventError| {
                corrupt(e.to_string())
            })?;
            event = event.with_role(role);
        }
        Ok(event)
    }
}

fn block_to_sql(column: &'static str, value: BlockHeight) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange { column, value })
}

fn count_to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn load_parents(conn: &Connection, key: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT parent_id FROM parents WHERE event_id = ?1 ORDER BY position",
    )?;
    let parents = stmt
        .query_map([key], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(parents)
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Query-only connection, safe to share across threads.
#[derive(Debug)]
pub struct SqliteReader {
    conn: Mutex<Connection>,
}

impl SqliteReader {
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read both cursors.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the cursor row cannot be read.
    pub fn cursors(&self) -> Result<Cursors, StoreError> {
        let conn = self.lock();
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT epoch, last_block FROM cursor WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((epoch, last_block)) = row else {
            return Ok(Cursors::default());
        };
        let corrupt = |reason: String| StoreError::Corrupt {
            id: "cursor".to_string(),
            reason,
        };
        Ok(Cursors {
            epoch: Epoch::try_from(epoch).map_err(|e| corrupt(e.to_string()))?,
            last_block: BlockHeight::try_from(last_block).map_err(|e| corrupt(e.to_string()))?,
        })
    }

    /// Newest epoch recorded by the sink.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the cursor row cannot be read.
    pub fn epoch(&self) -> Result<Epoch, StoreError> {
        Ok(self.cursors()?.epoch)
    }

    /// Highest block whose atropos event is stored.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the cursor row cannot be read.
    pub fn last_block(&self) -> Result<BlockHeight, StoreError> {
        Ok(self.cursors()?.last_block)
    }

    /// All stored events of one epoch, ordered by sequence.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails or a row is corrupt.
    pub fn events_in_epoch(&self, epoch: Epoch) -> Result<Vec<Event>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE epoch = ?1 AND complete = 1 ORDER BY seq, id"
        ))?;
        let rows = stmt
            .query_map([i64::from(epoch)], EventRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT p.event_id, p.parent_id
             FROM parents p
             JOIN events e ON e.id = p.event_id
             WHERE e.epoch = ?1 AND e.complete = 1
             ORDER BY p.event_id, p.position",
        )?;
        let pairs = stmt.query_map([i64::from(epoch)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for pair in pairs {
            let (child, parent) = pair?;
            edges.entry(child).or_default().push(parent);
        }

        rows.into_iter()
            .map(|row| {
                let parents = edges.remove(&row.id).unwrap_or_default();
                row.decode(&parents)
            })
            .collect()
    }

    /// Every transitive ancestor of `id`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails or a stored id is corrupt.
    pub fn ancestors(&self, id: &EventId) -> Result<Vec<EventId>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "WITH RECURSIVE ancestry(id) AS (
                SELECT parent_id FROM parents WHERE event_id = ?1
                UNION
                SELECT p.parent_id FROM parents p JOIN ancestry a ON p.event_id = a.id
            )
            SELECT id FROM ancestry ORDER BY id",
        )?;
        let ids = stmt
            .query_map([id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(%id, count = ids.len(), "ancestors resolved");

        ids.into_iter()
            .map(|text| {
                text.parse().map_err(|e: crate::id::IdError| StoreError::Corrupt {
                    id: text.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Number of completely stored events.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    pub fn event_count(&self) -> Result<u64, StoreError> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events WHERE complete = 1", [], |row| {
            row.get(0)
        })?;
        Ok(count_to_u64(count))
    }

    /// Number of stored parent edges.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    pub fn edge_count(&self) -> Result<u64, StoreError> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM parents", [], |row| row.get(0))?;
        Ok(count_to_u64(count))
    }
}

impl EventLookup for SqliteReader {
    fn has_event(&self, id: &EventId) -> Result<bool, StoreError> {
        let conn = self.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM events WHERE id = ?1 AND complete = 1)",
            [id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Parents come from stored edges in position order.
    fn get_event(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        let conn = self.lock();
        let key = id.to_string();
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1 AND complete = 1"),
                [&key],
                EventRow::from_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let parents = load_parents(&conn, &key)?;
        row.decode(&parents).map(Some)
    }
}

impl StoreReader for SqliteReader {
    fn cursors(&self) -> Result<Cursors, StoreError> {
        Self::cursors(self)
    }

    fn events_in_epoch(&self, epoch: Epoch) -> Result<Vec<Event>, StoreError> {
        Self::events_in_epoch(self, epoch)
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Write connection owned by one sink worker.
#[derive(Debug)]
pub struct SqliteWriter {
    conn: Connection,
}

impl StoreWriter for SqliteWriter {
    fn insert_event(&mut self, event: &Event) -> Result<(), StoreError> {
        let block = event
            .block()
            .map(|block| block_to_sql("block", block))
            .transpose()?;
        self.conn.execute(
            "INSERT INTO events (id, epoch, seq, creator, block, role)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO NOTHING",
            params![
                event.id().to_string(),
                i64::from(event.epoch()),
                i64::from(event.id().seq()),
                i64::from(event.creator()),
                block,
                event.role().map(Role::as_str),
            ],
        )?;
        Ok(())
    }

    /// Writes the edges and marks the event complete in one transaction.
    /// Every parent must already be complete.
    fn insert_edges(&mut self, event: &Event) -> Result<(), StoreError> {
        let child = event.id().to_string();
        let tx = self.conn.transaction()?;
        {
            let mut parent_state =
                tx.prepare_cached("SELECT complete FROM events WHERE id = ?1")?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO parents (event_id, parent_id, position)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(event_id, parent_id) DO NOTHING",
            )?;
            for (position, parent) in (0_i64..).zip(event.parents()) {
                let key = parent.to_string();
                let complete: Option<bool> = parent_state
                    .query_row([&key], |row| row.get(0))
                    .optional()?;
                if complete != Some(true) {
                    return Err(StoreError::Rejected(*parent));
                }
                insert.execute(params![child, key, position])?;
            }
        }
        let marked = tx.execute("UPDATE events SET complete = 1 WHERE id = ?1", [&child])?;
        if marked == 0 {
            return Err(StoreError::Rejected(event.id()));
        }
        tx.commit()?;
        Ok(())
    }

    fn set_epoch(&mut self, epoch: Epoch) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE cursor SET epoch = ?1 WHERE id = 1 AND epoch < ?1",
            [i64::from(epoch)],
        )?;
        Ok(())
    }

    fn set_last_block(&mut self, block: BlockHeight) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE cursor SET last_block = ?1 WHERE id = 1 AND last_block < ?1",
            [block_to_sql("last_block", block)?],
        )?;
        Ok(())
    }
}
