//! Logging and tracing setup

use crate::config::LoggingConfig;
use crate::log_buffer::LogRingBuffer;
use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, prelude::*, util::SubscriberInitExt, EnvFilter};

/// Initialize logging and tracing, feeding every event into `buffer` as well.
/// `RUST_LOG` takes precedence over the configured level. Output goes to stderr so that
/// command output on stdout stays machine-readable.
pub fn initialize_logging(config: &LoggingConfig, buffer: &Arc<LogRingBuffer>) -> Result<()> {
    // Set up environment filter
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    // Set up formatting layer based on format
    let fmt_layer = match config.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        "compact" => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(true)
            .boxed(),
        _ => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
            .boxed(),
    };

    // Initialize the subscriber
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(buffer.layer())
        .try_init()?;

    Ok(())
}
