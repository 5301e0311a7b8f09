//! hugeup command-line uploader entry point.

mod cli;
mod config;
mod upload;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting hugeup");

    let config = config::Config::load(args.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(upload::run(args, config))
}
