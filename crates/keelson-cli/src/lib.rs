//! keelson CLI library

pub mod commands;
pub mod config;
pub mod error;
pub mod kube_store;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// keelson - phased cluster lifecycle management
#[derive(Parser, Debug)]
#[command(name = "keelson")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply a cluster configuration
    Apply(commands::apply::ApplyArgs),
    /// Show what applying a configuration would change
    Diff(commands::diff::DiffArgs),
    /// Show or reset the persisted upgrade state
    UpgradeState(commands::upgrade_state::UpgradeStateArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Apply(args) => commands::apply::run(args).await,
            Commands::Diff(args) => commands::diff::run(args).await,
            Commands::UpgradeState(args) => commands::upgrade_state::run(args).await,
        }
    }
}
