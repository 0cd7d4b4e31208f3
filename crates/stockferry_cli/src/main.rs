//! stockferry CLI
//!
//! Operator tools for a stockferry state directory.
//!
//! # Commands
//!
//! - `inspect` - Display log sizes and row counts
//! - `list` - List transfers
//! - `status` - Show one transfer and its chunks
//! - `cleanup` - Delete finished transfers and old integrity history
//! - `compact` - Rewrite the logs with live rows only
//! - `verify` - Check local records against stored checksums
//! - `repair` - Re-checksum one record
//! - `stats` - Summarize the integrity tables

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// stockferry command-line tools.
#[derive(Parser)]
#[command(name = "stockferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the state directory
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
    /// Display log sizes and row counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List transfers
    List {
        /// Only pending, in-progress and paused transfers
        #[arg(short, long)]
        active: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show one transfer
    Status {
        /// Transfer id
        id: String,

        /// Also list its chunks
        #[arg(short, long)]
        chunks: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete finished transfers and resolved integrity history
    Cleanup {
        /// Age threshold in days
        #[arg(short, long, default_value = "7")]
        older_than_days: u64,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Rewrite the logs keeping live rows only
    Compact,

    /// Check local records against stored checksums
    Verify {
        /// JSON file holding an array of records
        #[arg(short, long)]
        records: PathBuf,

        /// Limit to one category (component, package, pallet)
        #[arg(short, long)]
        category: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Recompute the checksum of one record
    Repair {
        /// JSON file holding an array of records
        #[arg(short, long)]
        records: PathBuf,

        /// Record category
        category: String,

        /// Record id
        id: String,
    },

    /// Summarize checksums, issues and repairs
    Stats {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("State path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::List { active, format } => {
            let path = cli.path.ok_or("State path required for list")?;
            commands::transfers::list(&path, active, &format)?;
        }
        Commands::Status { id, chunks, format } => {
            let path = cli.path.ok_or("State path required for status")?;
            commands::transfers::status(&path, &id, chunks, &format)?;
        }
        Commands::Cleanup {
            older_than_days,
            dry_run,
        } => {
            let path = cli.path.ok_or("State path required for cleanup")?;
            commands::cleanup::run(&path, older_than_days, dry_run)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("State path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::Verify {
            records,
            category,
            format,
        } => {
            let path = cli.path.ok_or("State path required for verify")?;
            commands::integrity::verify(&path, &records, category.as_deref(), &format)?;
        }
        Commands::Repair {
            records,
            category,
            id,
        } => {
            let path = cli.path.ok_or("State path required for repair")?;
            commands::integrity::repair(&path, &records, &category, &id)?;
        }
        Commands::Stats { format } => {
            let path = cli.path.ok_or("State path required for stats")?;
            commands::integrity::stats(&path, &format)?;
        }
        Commands::Version => {
            println!("stockferry CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("stockferry core v{}", stockferry_core::VERSION);
        }
    }

    Ok(())
}
