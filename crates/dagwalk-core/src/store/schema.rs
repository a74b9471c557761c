//! SQLite schema for the durable event graph.
//!
//! The schema keeps only what is needed to preserve graph structure:
//! - `events` holds one row per event keyed by its text id, with a
//!   `complete` flag that is set once all of its parent edges are written
//! - `parents` holds one directed edge per parent relation; both ends
//!   reference `events`, so an edge can never point at a missing node
//! - `cursor` is the singleton row tracking the current epoch and the
//!   highest fully stored block

/// Migration v1: events, parent edges and the cursor row.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY CHECK (length(id) = 66 AND id LIKE '0x%'),
    epoch INTEGER NOT NULL CHECK (epoch >= 0),
    seq INTEGER NOT NULL CHECK (seq >= 0),
    creator INTEGER NOT NULL CHECK (creator >= 0),
    block INTEGER CHECK (block IS NULL OR block >= 0),
    role TEXT CHECK (role IS NULL OR role IN ('atropos', 'root'))
);

CREATE TABLE IF NOT EXISTS parents (
    event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
    parent_id TEXT NOT NULL REFERENCES events(id),
    position INTEGER NOT NULL CHECK (position >= 0),
    PRIMARY KEY (event_id, parent_id),
    CHECK (event_id <> parent_id)
);

CREATE TABLE IF NOT EXISTS cursor (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    epoch INTEGER NOT NULL DEFAULT 1,
    last_block INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO cursor (id, schema_version, epoch, last_block) VALUES (1, 1, 1, 0);
";

/// Migration v2: read-path indexes for epoch warm-up, block lookups and
/// reverse (child) traversal.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_epoch_seq
    ON events(epoch, seq);

CREATE INDEX IF NOT EXISTS idx_events_block
    ON events(block)
    WHERE block IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_parents_parent
    ON parents(parent_id, event_id);
";

/// Migration v3: an event counts as stored only once its edges are.
///
/// `complete` flips to 1 in the same transaction that writes the parent
/// edges. Rows written before the flag existed are taken as complete.
pub const MIGRATION_V3_SQL: &str = r"
ALTER TABLE events
    ADD COLUMN complete INTEGER NOT NULL DEFAULT 0 CHECK (complete IN (0, 1));

UPDATE events SET complete = 1;

CREATE INDEX IF NOT EXISTS idx_events_incomplete
    ON events(id)
    WHERE complete = 0;
";
