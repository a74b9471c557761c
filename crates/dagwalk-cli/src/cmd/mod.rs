pub mod ancestors;
pub mod completions;
pub mod generate;
pub mod import;
pub mod listen;
pub mod replay;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use dagwalk_core::config::{DagwalkConfig, load_config};
use dagwalk_core::ingest::{Ingest, IngestReport};
use dagwalk_core::shutdown::Shutdown;
use dagwalk_core::sink::DeliveryMode;
use dagwalk_core::store::SqliteStore;

use crate::output::{OutputMode, pretty_kv, render};
use crate::signal;

/// Flags shared by the commands that crawl a node.
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// JSON-RPC endpoint of the ledger node.
    #[arg(long, value_name = "URL")]
    pub rpc: Option<String>,

    /// Event store database.
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Return from each save only once the event is durable.
    #[arg(long)]
    pub ack: bool,
}

/// Load the config file and apply command-line overrides on top.
pub fn effective_config(
    config_path: Option<&Path>,
    db: Option<&Path>,
    rpc: Option<&str>,
    ack: bool,
) -> Result<DagwalkConfig> {
    let mut config = load_config(config_path)?;
    if let Some(db) = db {
        config.store.path = db.to_path_buf();
    }
    if let Some(rpc) = rpc {
        config.source.rpc_url = rpc.to_string();
    }
    if ack {
        config.sink.mode = DeliveryMode::Acknowledged;
    }
    config.validate()?;
    Ok(config)
}

/// Open the store, hook up OS signals and start the pipeline.
pub fn start_ingest(config: &DagwalkConfig) -> Result<Ingest> {
    let store = SqliteStore::open(&config.store.path).with_context(|| {
        format!("Failed to open event store {}", config.store.path.display())
    })?;
    let shutdown = Shutdown::new();
    signal::install(shutdown.clone())?;
    Ingest::new(config.clone(), &store, shutdown).context("Failed to start ingest pipeline")
}

pub fn render_report(mode: OutputMode, report: &IngestReport) -> Result<()> {
    render(mode, report, |report, w| {
        if let Some(crawl) = report.crawl {
            pretty_kv(w, "blocks", crawl.blocks.to_string())?;
            pretty_kv(w, "emitted", crawl.emitted.to_string())?;
            pretty_kv(w, "retries", crawl.retries.to_string())?;
            pretty_kv(w, "skipped", crawl.skipped.to_string())?;
        }
        pretty_kv(w, "released", report.buffer.released.to_string())?;
        pretty_kv(w, "duplicates", report.buffer.duplicates.to_string())?;
        pretty_kv(w, "evicted", report.buffer.evicted.to_string())?;
        pretty_kv(w, "saved", report.sink.saved.to_string())?;
        pretty_kv(w, "failed", report.sink.failed.to_string())?;
        pretty_kv(w, "pending", report.pending.to_string())?;
        if report.interrupted {
            writeln!(w, "stopped by signal")?;
        }
        Ok(())
    })
}
