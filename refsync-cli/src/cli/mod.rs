//! Command-line interface

pub mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Compare and synchronize reference data between Dynamics 365 environments
#[derive(Parser, Debug)]
#[command(name = "refsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Load environment variables from this file instead of ./.env
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synchronize the target environment from the source environment
    Migrate(MigrateArgs),

    /// Report differences between two environments without writing
    Compare(CompareArgs),
}

/// Source/target/config arguments shared by every command
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Path to the JSON sync configuration
    #[arg(short, long)]
    pub config: PathBuf,

    /// Source environment name (variables are read from {NAME}_URL etc.)
    #[arg(short, long)]
    pub source: String,

    /// Target environment name
    #[arg(short, long)]
    pub target: String,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Compute every change but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Skip reading the target and write every source record
    #[arg(long)]
    pub force: bool,

    /// Operations per $batch request (overrides the config file)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Write an Excel report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Write the summary as JSON to this path
    #[arg(long)]
    pub json: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Write an Excel report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Write the comparison as JSON to this path
    #[arg(long)]
    pub json: Option<PathBuf>,
}
