use std::path::Path;

use anyhow::Result;
use clap::Args;
use dagwalk_core::crawler::CrawlMode;
use dagwalk_core::source::RpcSource;
use tracing::info;

use super::{IngestArgs, effective_config, render_report, start_ingest};
use crate::output::OutputMode;

/// Arguments for `dagwalk listen`.
#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub ingest: IngestArgs,

    /// Never crawl blocks below this height.
    #[arg(long, value_name = "N")]
    pub dag_start: Option<u64>,
}

/// Follow the node's head until a signal arrives.
///
/// # Errors
///
/// Returns an error if the config, the store or a pipeline worker cannot be
/// prepared. Transport failures are retried and never end the run.
pub fn run_listen(args: &ListenArgs, config_path: Option<&Path>, output: OutputMode) -> Result<()> {
    let mut config = effective_config(
        config_path,
        args.ingest.db.as_deref(),
        args.ingest.rpc.as_deref(),
        args.ingest.ack,
    )?;
    if let Some(dag_start) = args.dag_start {
        config.crawler.dag_start = dag_start;
    }

    let source = RpcSource::new(&config.source.rpc_url, config.source.request_timeout());
    let ingest = start_ingest(&config)?;
    let from = ingest.start_height();
    info!(rpc = %config.source.rpc_url, from, "listening for new blocks");

    let report = ingest.run_crawl(source, CrawlMode::Live { from })?;
    render_report(output, &report)
}
