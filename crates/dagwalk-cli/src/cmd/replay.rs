use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use dagwalk_core::source::jsonl::{JsonlError, read_events};
use tracing::{error, info};

use super::{effective_config, render_report, start_ingest};
use crate::output::OutputMode;

/// Arguments for `dagwalk replay`.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON Lines dump, one event per line.
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,

    /// Event store database.
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Return from each save only once the event is durable.
    #[arg(long)]
    pub ack: bool,
}

/// Push every event of a dump through the buffer in file order.
///
/// Lines that do not decode are logged and skipped. A read error ends the
/// replay early; what was read so far is still stored and reported.
///
/// # Errors
///
/// Returns an error if the input cannot be opened or read, or if the
/// config, the store or a pipeline worker cannot be prepared.
pub fn run_replay(args: &ReplayArgs, config_path: Option<&Path>, output: OutputMode) -> Result<()> {
    let config = effective_config(config_path, args.db.as_deref(), None, args.ack)?;
    let file = File::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    info!(input = %args.input.display(), "replaying dump");

    let ingest = start_ingest(&config)?;
    let mut read_failure = None;
    let events = read_events(BufReader::new(file))
        .map_while(|item| match item {
            Ok(event) => Some(Some(event)),
            Err(err @ JsonlError::Decode { .. }) => {
                error!(error = %err, code = %err.code(), "skipping undecodable line");
                Some(None)
            }
            Err(err @ JsonlError::Io(_)) => {
                error!(error = %err, code = %err.code(), "input read failed, stopping replay");
                read_failure = Some(err);
                None
            }
        })
        .flatten();

    let report = ingest.run_events(events)?;
    render_report(output, &report)?;
    match read_failure {
        Some(err) => Err(err).with_context(|| format!("Failed to read {}", args.input.display())),
        None => Ok(()),
    }
}
