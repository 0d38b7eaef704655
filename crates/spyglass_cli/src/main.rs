//! Spyglass CLI
//!
//! Command-line front end for a Spyglass node.
//!
//! # Commands
//!
//! - `start` - Run a node over a data directory
//! - `import` - Ingest JSON-lines telemetry against a schema
//! - `export` - Run a query and write matching events
//! - `status` - Report node state
//!
//! Exit codes: 0 success, 1 generic error, 2 configuration error.

mod commands;
mod json;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Spyglass command-line tools.
#[derive(Parser)]
#[command(name = "spyglass")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the node's data directory
    #[arg(global = true, short, long, default_value = "spyglass-data")]
    data_dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node until standard input closes
    Start,

    /// Ingest JSON-lines events
    Import {
        /// Schema file describing the record layout
        #[arg(short, long)]
        schema: PathBuf,

        /// Read events from this file instead of standard input
        #[arg(short, long)]
        read: Option<PathBuf>,

        /// Rows per ingested batch
        #[arg(long, default_value = "1024")]
        batch: usize,
    },

    /// Run a query and print matching events as JSON lines
    Export {
        /// The query expression
        expr: String,

        /// Stop after this many partitions
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Report node state
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Start => commands::start::run(&cli.data_dir),
        Commands::Import {
            schema,
            read,
            batch,
        } => commands::import::run(&cli.data_dir, &schema, read.as_deref(), batch),
        Commands::Export { expr, limit } => commands::export::run(&cli.data_dir, &expr, limit),
        Commands::Status => commands::status::run(&cli.data_dir),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(commands::CliError::Config(message)) => {
            eprintln!("configuration error: {message}");
            ExitCode::from(2)
        }
        Err(commands::CliError::Runtime(message)) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
