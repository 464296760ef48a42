//! Tracing setup

pub mod config;

pub use config::{LogConfig, LogFormat, DEFAULT_LOG_FILTER};

use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// Fails if the filter directives do not parse or a subscriber is already
/// installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_new(&config.filter)?;

    match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init()?,
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()?,
    }

    Ok(())
}
