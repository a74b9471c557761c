use std::path::Path;

use anyhow::{Result, bail};
use clap::Args;
use dagwalk_core::crawler::CrawlMode;
use dagwalk_core::source::RpcSource;

use super::{IngestArgs, effective_config, render_report, start_ingest};
use crate::output::OutputMode;

/// Arguments for `dagwalk import`.
#[derive(Args, Debug)]
pub struct ImportArgs {
    #[command(flatten)]
    pub ingest: IngestArgs,

    /// First block to crawl.
    #[arg(long, value_name = "N")]
    pub from: u64,

    /// Last block to crawl, inclusive.
    #[arg(long, value_name = "M")]
    pub to: u64,
}

/// Crawl a fixed block range once.
///
/// # Errors
///
/// Returns an error for an empty range or if the config, the store or a
/// pipeline worker cannot be prepared.
pub fn run_import(args: &ImportArgs, config_path: Option<&Path>, output: OutputMode) -> Result<()> {
    if args.from > args.to {
        bail!("--from {} is after --to {}", args.from, args.to);
    }
    let config = effective_config(
        config_path,
        args.ingest.db.as_deref(),
        args.ingest.rpc.as_deref(),
        args.ingest.ack,
    )?;

    let source = RpcSource::new(&config.source.rpc_url, config.source.request_timeout());
    let ingest = start_ingest(&config)?;
    let report = ingest.run_crawl(
        source,
        CrawlMode::Range {
            from: args.from,
            to: args.to,
        },
    )?;
    render_report(output, &report)
}
