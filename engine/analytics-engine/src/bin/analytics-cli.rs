//! # Analytics CLI Binary
//!
//! Command-line interface for recording and querying analytics data.

use analytics_engine::cli::{Cli, CliHandler};
use analytics_engine::config::AnalyticsConfig;
use analytics_engine::{log_buffer, logging};
use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging; the configuration is loaded again by the handler with overrides applied
    let config = AnalyticsConfig::load(cli.config.as_deref())?;
    let buffer = log_buffer::install_global(config.log_buffer.capacity);
    logging::initialize_logging(&config.logging, &buffer)?;

    // Create CLI handler
    let handler = CliHandler::new(cli.config.as_ref(), cli.data_path.as_ref()).await?;

    // Handle command
    handler.handle_command(cli.command).await?;

    Ok(())
}
