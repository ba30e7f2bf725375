//! evlog CLI - Command-line inspection of evlog binary event logs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "evlog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the records of a log in file order
    Dump {
        /// Path to the event log
        file: PathBuf,

        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<usize>,

        /// Show payloads as text instead of hex
        #[arg(short, long)]
        strings: bool,

        /// Skip Prolog records
        #[arg(long)]
        no_prologs: bool,
    },

    /// Record counts per thread
    Stats {
        /// Path to the event log
        file: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode the whole log and fail on the first malformed record
    Verify {
        /// Path to the event log
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Execute command
    match cli.command {
        Commands::Dump {
            file,
            limit,
            strings,
            no_prologs,
        } => {
            let options = commands::dump::DumpOptions {
                limit,
                strings,
                prologs: !no_prologs,
            };
            commands::dump::execute(file, options)?;
        }
        Commands::Stats { file, json } => {
            commands::stats::execute(file, json)?;
        }
        Commands::Verify { file } => {
            commands::verify::execute(file)?;
        }
    }

    Ok(())
}
