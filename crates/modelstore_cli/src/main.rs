//! modelstore CLI
//!
//! Command-line tools for modelstore commit logs.
//!
//! # Commands
//!
//! - `inspect` - Show the log header and per-collection counts
//! - `dump` - Print stored records as JSON
//! - `verify` - Check frame structure and checksums

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// modelstore command-line tools.
#[derive(Parser)]
#[command(name = "modelstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store's log file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Passphrase for encrypted stores
    #[arg(global = true, long)]
    passphrase: Option<String>,

    /// Salt the passphrase was derived with
    #[arg(global = true, long, default_value = "modelstore")]
    salt: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the log header and per-collection counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print stored records as JSON, one per line
    Dump {
        /// Only dump this collection
        #[arg(short, long)]
        collection: Option<String>,

        /// Maximum number of records per collection
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Check frame structure and checksums
    Verify,

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

    let unlock = commands::Unlock {
        passphrase: cli.passphrase,
        salt: cli.salt,
    };

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &unlock, &format)?;
        }
        Commands::Dump { collection, limit } => {
            let path = cli.path.ok_or("Store path required for dump")?;
            commands::dump::run(&path, &unlock, collection.as_deref(), limit)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("modelstore CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
