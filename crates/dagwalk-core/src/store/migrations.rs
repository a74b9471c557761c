//! Versioned upgrades of the event graph schema.
//!
//! The applied version lives in `PRAGMA user_version` and is mirrored into
//! `cursor.schema_version`, so both the file header and a plain `SELECT`
//! tell which layout the sink last wrote against. Writers upgrade on open;
//! read-only consumers only check.

use rusqlite::{Connection, types::Type};
use tracing::debug;

use super::schema;

/// One forward step of the event graph layout.
struct SchemaStep {
    version: u32,
    label: &'static str,
    sql: &'static str,
}

const STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        label: "events, parent edges and cursor",
        sql: schema::MIGRATION_V1_SQL,
    },
    SchemaStep {
        version: 2,
        label: "epoch, block and child indexes",
        sql: schema::MIGRATION_V2_SQL,
    },
    SchemaStep {
        version: 3,
        label: "event completeness flag",
        sql: schema::MIGRATION_V3_SQL,
    },
];

/// Layout version this build reads and writes.
pub const LATEST_SCHEMA_VERSION: u32 = 3;

/// Version recorded in the database header, 0 for a fresh file.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read or holds a negative value.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(err)))
}

/// Bring the event graph layout up to [`LATEST_SCHEMA_VERSION`].
///
/// Steps above the recorded version run in order, one transaction each, so
/// an interrupted upgrade resumes from the last finished step.
///
/// # Errors
///
/// Returns an error if any step fails; earlier steps stay applied.
pub fn upgrade(conn: &mut Connection) -> rusqlite::Result<u32> {
    let start = schema_version(conn)?;
    let mut reached = start;

    for step in STEPS.iter().filter(|step| step.version > start) {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)?;
        tx.execute(
            "UPDATE cursor SET schema_version = ?1 WHERE id = 1",
            [i64::from(step.version)],
        )?;
        tx.pragma_update(None, "user_version", i64::from(step.version))?;
        tx.commit()?;
        debug!(version = step.version, step = step.label, "schema step applied");
        reached = step.version;
    }

    Ok(reached)
}
