//! SubSync CLI
//!
//! Command-line tools for persisted subscription logs.
//!
//! # Commands
//!
//! - `inspect` - Display the latest subscription set and its history
//! - `verify` - Verify log integrity and state transitions
//! - `dump-log` - Dump log records for debugging
//! - `compact` - Rewrite the log down to the latest set

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SubSync command-line tools.
#[derive(Parser)]
#[command(name = "subsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the subscription log, or the directory holding it
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the latest subscription set and version history
    Inspect {
        /// List the subscriptions of the latest set
        #[arg(short, long)]
        subscriptions: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify log integrity and state transitions
    Verify,

    /// Dump log records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the log down to the latest set and state
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            subscriptions,
            format,
        } => {
            let path = cli.path.ok_or("Log path required for inspect")?;
            commands::inspect::run(&path, subscriptions, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Log path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::DumpLog { limit, format } => {
            let path = cli.path.ok_or("Log path required for dump-log")?;
            commands::dump_log::run(&path, limit, &format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Log path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("SubSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Log format v{}", subsync_core::log::LOG_VERSION);
            println!("Protocol v{}", subsync_protocol::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
