//! optidoc CLI
//!
//! Demonstrations of optimistic concurrency against an in-memory store.
//!
//! # Commands
//!
//! - `race` - Concurrent increment writers on one counter
//! - `transfer` - Two-document transaction, optionally failing mid-way
//! - `bulk-read` - Repeated conditional reads with tracked tokens

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Optimistic concurrency demos.
#[derive(Parser)]
#[command(name = "optidoc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent increment writers against one counter
    Race {
        /// Number of concurrent writers
        #[arg(short, long, default_value = "8")]
        writers: usize,

        /// Increments issued by each writer
        #[arg(short, long, default_value = "10")]
        increments: usize,

        /// Retries allowed per increment
        #[arg(short, long, default_value = "32")]
        max_retries: u32,
    },

    /// Move an amount between two accounts in one transaction
    Transfer {
        /// Amount to move
        #[arg(short, long, default_value = "25")]
        amount: i64,

        /// Credit a missing account so the transaction rolls back
        #[arg(long)]
        fail: bool,
    },

    /// Read a set of documents repeatedly, reusing observed tokens
    BulkRead {
        /// Number of documents
        #[arg(short, long, default_value = "20")]
        documents: usize,

        /// Documents modified between the two rounds
        #[arg(short, long, default_value = "3")]
        touch: usize,

        /// Maximum reads in flight
        #[arg(short, long, default_value = "8")]
        concurrency: usize,
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

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Race {
            writers,
            increments,
            max_retries,
        } => {
            runtime.block_on(commands::race::run(writers, increments, max_retries, &cli.format))?;
        }
        Commands::Transfer { amount, fail } => {
            runtime.block_on(commands::transfer::run(amount, fail, &cli.format))?;
        }
        Commands::BulkRead {
            documents,
            touch,
            concurrency,
        } => {
            runtime.block_on(commands::bulk_read::run(documents, touch, concurrency, &cli.format))?;
        }
        Commands::Version => {
            println!("optidoc CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("optidoc core v{}", optidoc_core::VERSION);
        }
    }

    Ok(())
}
