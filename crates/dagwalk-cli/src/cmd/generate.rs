use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use dagwalk_core::source::jsonl::write_events;
use dagwalk_core::synth::{SynthConfig, generate};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, render};

/// Arguments for `dagwalk generate`.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Destination JSONL file.
    #[arg(long, value_name = "FILE")]
    pub output: PathBuf,

    /// Number of blocks, each closed by one atropos event.
    #[arg(long, default_value_t = 10)]
    pub blocks: u64,

    /// Number of distinct event creators.
    #[arg(long, default_value_t = 4)]
    pub creators: u32,

    /// Ordinary events per block.
    #[arg(long, default_value_t = 6)]
    pub events_per_block: usize,

    /// Blocks per epoch.
    #[arg(long, default_value_t = 5)]
    pub blocks_per_epoch: u64,

    /// RNG seed; the same seed always yields the same DAG.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

#[derive(Debug, Serialize)]
struct GenerateOutput {
    output: String,
    events: usize,
    blocks: usize,
    /// Atropos of the last block.
    head: Option<String>,
}

/// Write a synthetic DAG dump.
///
/// # Errors
///
/// Returns an error if the output file cannot be written.
pub fn run_generate(args: &GenerateArgs, output: OutputMode) -> Result<()> {
    let config = SynthConfig {
        blocks: args.blocks,
        creators: args.creators,
        events_per_block: args.events_per_block,
        blocks_per_epoch: args.blocks_per_epoch,
        seed: args.seed,
        ..SynthConfig::default()
    };
    let dag = generate(&config).context("Failed to generate DAG")?;

    let file = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let events = write_events(BufWriter::new(file), dag.events())
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    let value = GenerateOutput {
        output: args.output.display().to_string(),
        events,
        blocks: dag.blocks().len(),
        head: dag.blocks().last().map(|(_, id)| id.to_string()),
    };
    render(output, &value, |value, w| {
        pretty_kv(w, "output", &value.output)?;
        pretty_kv(w, "events", value.events.to_string())?;
        pretty_kv(w, "blocks", value.blocks.to_string())?;
        if let Some(head) = &value.head {
            pretty_kv(w, "head", head)?;
        }
        Ok(())
    })
}
