#![forbid(unsafe_code)]

mod cmd;
mod output;
mod signal;

use clap::{CommandFactory, Parser, Subcommand};
use output::OutputMode;
use std::env;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "dagwalk",
    author,
    version,
    about = "dagwalk: causal-order ingestion of DAG-ledger events",
    long_about = None
)]
struct Cli {
    /// Read settings from this TOML file instead of the user config.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Text
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Ingest",
        about = "Follow the live head and store new events",
        long_about = "Crawl every new block from a ledger node and store its events parents-first. Runs until interrupted.",
        after_help = "EXAMPLES:\n    # Follow a local node\n    dagwalk listen --rpc http://127.0.0.1:18545 --db dag.sqlite3\n\n    # Start at block 1000 and wait for every write\n    dagwalk listen --db dag.sqlite3 --dag-start 1000 --ack"
    )]
    Listen(cmd::listen::ListenArgs),

    #[command(
        next_help_heading = "Ingest",
        about = "Store a historical block range",
        long_about = "Crawl blocks FROM..=TO once and exit when they are stored.",
        after_help = "EXAMPLES:\n    # Import the first hundred blocks\n    dagwalk import --db dag.sqlite3 --from 1 --to 100\n\n    # Emit the run report as JSON\n    dagwalk import --db dag.sqlite3 --from 1 --to 100 --json"
    )]
    Import(cmd::import::ImportArgs),

    #[command(
        next_help_heading = "Ingest",
        about = "Load a JSONL event dump",
        long_about = "Feed every event of a JSON Lines dump through the causal buffer in file order.",
        after_help = "EXAMPLES:\n    # Replay a dump\n    dagwalk replay --input events.jsonl --db dag.sqlite3\n\n    # Replay with acknowledged writes\n    dagwalk replay --input events.jsonl --db dag.sqlite3 --ack"
    )]
    Replay(cmd::replay::ReplayArgs),

    #[command(
        next_help_heading = "Read",
        about = "List the stored ancestors of an event",
        long_about = "Print every stored event reachable from ID through parent edges.",
        after_help = "EXAMPLES:\n    # Ancestors of an event\n    dagwalk ancestors --db dag.sqlite3 0x0000000100000007...\n\n    # Using the epoch:seq:tail form\n    dagwalk ancestors --db dag.sqlite3 1:7:a1b2c3... --json"
    )]
    Ancestors(cmd::ancestors::AncestorsArgs),

    #[command(
        next_help_heading = "Tools",
        about = "Write a synthetic DAG dump",
        long_about = "Generate a deterministic synthetic DAG and write it as JSON Lines.",
        after_help = "EXAMPLES:\n    # Ten blocks from four creators\n    dagwalk generate --output events.jsonl --blocks 10 --creators 4\n\n    # Another DAG of the same shape\n    dagwalk generate --output events.jsonl --blocks 10 --creators 4 --seed 7"
    )]
    Generate(cmd::generate::GenerateArgs),

    #[command(
        next_help_heading = "Tools",
        about = "Generate shell completion scripts",
        long_about = "Generate shell completion scripts for supported shells.",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    dagwalk completions bash\n\n    # Generate zsh completions\n    dagwalk completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DAGWALK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "dagwalk=debug,info"
        } else {
            "dagwalk=info,warn"
        })
    });

    let format = env::var("DAGWALK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries command output only.
    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let output = cli.output_mode();
    let config_path = cli.config.as_deref();
    debug!(config = ?config_path, "dagwalk starting");

    match cli.command {
        Commands::Listen(ref args) => cmd::listen::run_listen(args, config_path, output),
        Commands::Import(ref args) => cmd::import::run_import(args, config_path, output),
        Commands::Replay(ref args) => cmd::replay::run_replay(args, config_path, output),
        Commands::Ancestors(ref args) => cmd::ancestors::run_ancestors(args, config_path, output),
        Commands::Generate(ref args) => cmd::generate::run_generate(args, output),
        Commands::Completions(ref args) => {
            cmd::completions::run_completions(args.shell, &mut Cli::command())
        }
    }
}
