//! ModHost CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod host;
mod output;

use commands::Cli;
use modhost_core::config::{AppConfig, LoggingConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load_from(&cli.config_dir, &cli.env) {
        Ok(config) => config,
        Err(e) => {
            output::print_error(&format!("Failed to load config: {e}"));
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging);

    if let Err(e) = cli.execute(config).await {
        output::print_error(&e.to_string());
        std::process::exit(1);
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.is_json() {
        builder.json().init();
    } else {
        builder.init();
    }
}
