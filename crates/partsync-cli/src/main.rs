//! partsync CLI - Command-line interface for partsync
//!
//! Provides commands for:
//! - Previewing what the next resync would do
//! - Removing empty remote folders
//! - Viewing tracking status
//! - Inspecting and validating configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    check::CheckCommand, cleanup::CleanupFoldersCommand, config::ConfigCommand,
    status::StatusCommand, CliContext,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "partsync",
    version,
    about = "Mirror a local 3D-model folder into Printago parts"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show what the next resync would do, without changing anything
    Check(CheckCommand),
    /// Delete remote folders that no longer hold anything
    CleanupFolders(CleanupFoldersCommand),
    /// Show tracking status
    Status(StatusCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = CliContext::new(cli.config, format);

    match cli.command {
        Commands::Check(cmd) => cmd.execute(&ctx).await,
        Commands::CleanupFolders(cmd) => cmd.execute(&ctx).await,
        Commands::Status(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
    }
}
