//! ObjDB CLI
//!
//! Command-line tools for ObjDB stores.
//!
//! # Commands
//!
//! - `inspect` - Display store metadata, schema and record counts
//! - `verify` - Check the manifest and WAL framing
//! - `dump-wal` - Dump WAL records for debugging
//! - `flags` - List, read and write feature flags
//! - `checkpoint` - Fold the WAL into a new checkpoint image

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ObjDB command-line store tools.
#[derive(Parser)]
#[command(name = "objdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Display store metadata, schema and record counts
    Inspect {
        /// List every record
        #[arg(short, long)]
        records: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check the manifest and WAL framing
    Verify,

    /// Dump WAL records for debugging
    DumpWal {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Read and write feature flags
    Flags {
        #[command(subcommand)]
        action: FlagAction,
    },

    /// Fold the WAL into a new checkpoint image
    Checkpoint,

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum FlagAction {
    /// List all flags
    List,
    /// Print one flag
    Get {
        /// Flag name
        name: String,
    },
    /// Set one flag
    Set {
        /// Flag name
        name: String,
        /// New state
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
    /// Invert one flag
    Toggle {
        /// Flag name
        name: String,
    },
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
        Commands::Inspect { records, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, records, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::DumpWal { limit, format } => {
            let path = cli.path.ok_or("Store path required for dump-wal")?;
            commands::dump_wal::run(&path, limit, &format)?;
        }
        Commands::Flags { action } => {
            let path = cli.path.ok_or("Store path required for flags")?;
            let action = match action {
                FlagAction::List => commands::flags::Action::List,
                FlagAction::Get { name } => commands::flags::Action::Get(name),
                FlagAction::Set { name, value } => commands::flags::Action::Set(name, value),
                FlagAction::Toggle { name } => commands::flags::Action::Toggle(name),
            };
            commands::flags::run(&path, action)?;
        }
        Commands::Checkpoint => {
            let path = cli.path.ok_or("Store path required for checkpoint")?;
            commands::checkpoint::run(&path)?;
        }
        Commands::Version => {
            println!("ObjDB CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
