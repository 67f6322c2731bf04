//! quire CLI
//!
//! Command-line interface for quire - inspect and drive the local mirror,
//! sync it with the remote record store, and query the derived tag index.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use quire_core::{Config, LocalStore};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "quire - Local-first record sync with a derived tag index")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the config file (overrides QUIRE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show record counts, dirty rows and sync cursors
    Status,
    /// Pull remote changes and push local ones
    Sync {
        /// Discard cursors and re-download everything
        #[arg(long)]
        full: bool,
        /// Only pull
        #[arg(long, conflicts_with = "push_only")]
        pull_only: bool,
        /// Only push
        #[arg(long, conflicts_with = "pull_only")]
        push_only: bool,
    },
    /// Update the derived tag index
    Index {
        /// Mark every block dirty first
        #[arg(long)]
        rebuild: bool,
        /// Run a single bounded batch instead of draining
        #[arg(long)]
        once: bool,
    },
    /// Move a block to the end of another document
    #[command(name = "move", alias = "mv")]
    Move {
        /// Block instance id
        block_id: String,
        /// Destination document instance id
        document_id: String,
    },
    /// List tags, or blocks by tag or domain
    Tags {
        /// Blocks carrying this tag
        #[arg(short, long, conflicts_with_all = ["domain", "mixed"])]
        tag: Option<String>,
        /// Blocks classified into this domain
        #[arg(short, long, conflicts_with = "mixed")]
        domain: Option<String>,
        /// Blocks carrying more than one domain tag
        #[arg(long)]
        mixed: bool,
    },
    /// Delete all local rows, the index and sync cursors
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (see `quire config show`)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work without opening the store
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
            Some(ConfigCommands::Path) => commands::config::path(config_path, &output),
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config, cli.verbose);

    let store = LocalStore::open(&config)
        .with_context(|| format!("Failed to open {}", config.sqlite_path().display()))?;

    match cli.command {
        Commands::Status => commands::status::show(&config, store, &output),
        Commands::Sync {
            full,
            pull_only,
            push_only,
        } => {
            let mode = commands::sync::SyncMode::from_flags(pull_only, push_only);
            commands::sync::run(&config, store, mode, full, &output).await
        }
        Commands::Index { rebuild, once } => {
            commands::index::run(&config, store, rebuild, once, &output).await
        }
        Commands::Move {
            block_id,
            document_id,
        } => commands::relocate::run(&config, store, &block_id, &document_id, &output).await,
        Commands::Tags { tag, domain, mixed } => {
            let query = commands::tags::TagQuery::from_args(tag, domain, mixed);
            commands::tags::run(store, query, &output)
        }
        Commands::Reset { yes } => commands::reset::run(store, yes, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

/// Initialize logging to stderr, or to the configured log file
///
/// `QUIRE_LOG` takes an `EnvFilter` directive and overrides the level flags.
fn init_logging(config: &Config, verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_env("QUIRE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(format!("quire_core={},quire_cli={}", log_level, log_level))
    });

    let (writer, ansi) = match &config.log_file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), false),
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                (BoxMakeWriter::new(std::io::stderr), true)
            }
        },
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(ansi)
        .with_writer(writer)
        .try_init();
}
