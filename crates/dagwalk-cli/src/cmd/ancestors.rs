use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use dagwalk_core::config::load_config;
use dagwalk_core::id::EventId;
use dagwalk_core::store::SqliteStore;
use serde::Serialize;

use crate::output::{OutputMode, render};

/// Arguments for `dagwalk ancestors`.
#[derive(Args, Debug)]
pub struct AncestorsArgs {
    /// Event store database.
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Event id, as `0x` + 64 hex digits or `epoch:seq:tail`.
    pub id: String,
}

#[derive(Debug, Serialize)]
struct AncestorsOutput {
    id: String,
    count: usize,
    ancestors: Vec<String>,
}

/// Print every stored ancestor of one event.
///
/// # Errors
///
/// Returns an error if the id does not parse, the store does not exist or
/// the query fails.
pub fn run_ancestors(
    args: &AncestorsArgs,
    config_path: Option<&Path>,
    output: OutputMode,
) -> Result<()> {
    let id = EventId::parse_any(&args.id).with_context(|| format!("Invalid event id {}", args.id))?;
    let path = match &args.db {
        Some(path) => path.clone(),
        None => load_config(config_path)?.store.path,
    };
    let reader = SqliteStore::open_read_only(&path)
        .with_context(|| format!("Failed to open event store {}", path.display()))?;
    let ancestors = reader
        .ancestors(&id)
        .with_context(|| format!("Failed to query ancestors of {id}"))?;

    let value = AncestorsOutput {
        id: id.to_string(),
        count: ancestors.len(),
        ancestors: ancestors.iter().map(ToString::to_string).collect(),
    };
    render(output, &value, |value, w| {
        for ancestor in &value.ancestors {
            writeln!(w, "{ancestor}")?;
        }
        Ok(())
    })
}
