mod cache;
mod cli;
mod config;
mod error;
mod logging;
mod query;
mod rpc;
mod tracker;

use clap::Parser;
use color_eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = cli::Cli::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Keep the guard alive so file logs get flushed on exit
  let _log_guard = logging::init(args.verbose, config.log_file.as_deref())?;

  cli::run(args, config).await
}
