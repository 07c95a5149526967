//! CLI command definitions and dispatch.

pub mod inspect;
pub mod load;
pub mod pack;
pub mod watch;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use modhost_core::config::AppConfig;
use modhost_core::error::AppError;

/// ModHost: dynamic plugin host
#[derive(Debug, Parser)]
#[command(name = "modhost", version, about, long_about = None)]
pub struct Cli {
    /// Directory holding `default` and per-environment config files
    #[arg(short, long, default_value = "config")]
    pub config_dir: String,

    /// Configuration environment overlay
    #[arg(short, long, default_value = "development")]
    pub env: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load a plugin directory, report on it and unload it
    Load(load::LoadArgs),
    /// Show the header and fingerprint of a module image
    Inspect(inspect::InspectArgs),
    /// Write a module image
    Pack(pack::PackArgs),
    /// Keep a plugin directory loaded and reload it when it changes
    Watch(watch::WatchArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self, config: AppConfig) -> Result<(), AppError> {
        match &self.command {
            Commands::Load(args) => load::execute(args, &config, self.format).await,
            Commands::Inspect(args) => inspect::execute(args, self.format).await,
            Commands::Pack(args) => pack::execute(args).await,
            Commands::Watch(args) => watch::execute(args, &config).await,
        }
    }
}

/// Helper: the plugin root, from the command line or the configuration.
pub fn plugin_root(dir: Option<&str>, config: &AppConfig) -> std::path::PathBuf {
    std::path::PathBuf::from(dir.unwrap_or(&config.plugins.directory))
}
