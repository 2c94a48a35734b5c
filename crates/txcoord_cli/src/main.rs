//! txcoord CLI
//!
//! Command-line tools for exploring the txcoord transaction coordinator.
//!
//! # Commands
//!
//! - `simulate` - Run one transaction against scripted resources
//! - `table` - Print the outcome join table and XA code classification
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// txcoord command-line tools.
#[derive(Parser)]
#[command(name = "txcoord")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one transaction against scripted resources
    ///
    /// Each resource is written `name[:key=value,...]`. Keys `start`, `end`,
    /// `prepare`, `commit`, `rollback` and `forget` take an XA code such as
    /// `heurmix` or `XAER_RMFAIL`; `rm` names the resource manager and the
    /// bare flag `readonly` makes the resource vote read-only.
    Simulate {
        /// Resources to enlist, in order
        resources: Vec<String>,

        /// Always run both phases, even for a single resource
        #[arg(long)]
        two_phase: bool,

        /// Mark the transaction rollback-only before completing it
        #[arg(long)]
        rollback_only: bool,

        /// Roll back instead of committing
        #[arg(long)]
        rollback: bool,

        /// Register a synchronization whose beforeCompletion raises this message
        #[arg(long, value_name = "MESSAGE")]
        raise_before_completion: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the outcome join table
    Table {
        /// Also classify every XA code
        #[arg(short, long)]
        codes: bool,

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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            resources,
            two_phase,
            rollback_only,
            rollback,
            raise_before_completion,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                two_phase,
                rollback_only,
                rollback,
                raise_before_completion,
            };
            commands::simulate::run(&resources, &options, &format)?;
        }
        Commands::Table { codes, format } => {
            commands::table::run(codes, &format)?;
        }
        Commands::Version => {
            println!("txcoord CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("txcoord core v{}", txcoord_core::VERSION);
        }
    }

    Ok(())
}
