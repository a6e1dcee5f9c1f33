//! ShelfSync CLI
//!
//! Command-line tools for exercising the ShelfSync core without a backend.
//!
//! # Commands
//!
//! - `backoff` - Print the retry schedule of the effective configuration
//! - `simulate` - Run a sync scenario against a scripted remote
//! - `config` - Show the effective configuration

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::simulate::Scenario;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ShelfSync command-line tools.
#[derive(Parser)]
#[command(name = "shelfsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the retry schedule
    Backoff {
        /// Number of attempts to list (defaults to the policy's budget)
        #[arg(short, long)]
        attempts: Option<u32>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a sync scenario against a scripted remote
    Simulate {
        /// Scenario to run
        #[arg(value_enum)]
        scenario: Scenario,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the effective configuration
    Config,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => config::CliConfig::load(path)?,
        None => config::CliConfig::default(),
    };

    match cli.command {
        Commands::Backoff { attempts, format } => {
            commands::backoff::run(&config.sync.retry, attempts, &format)?;
        }
        Commands::Simulate { scenario, format } => {
            commands::simulate::run(&config, scenario, &format).await?;
        }
        Commands::Config => {
            config.print();
        }
        Commands::Version => {
            println!("ShelfSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("ShelfSync Core v{}", shelfsync_core::VERSION);
        }
    }

    Ok(())
}
