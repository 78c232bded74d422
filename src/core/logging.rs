//! tracing subscriber setup for the CLI.
//!
//! Logs go to stderr so JSON command output on stdout stays machine-readable.
//! `ACCOLADE_LOG` (an `EnvFilter` directive) overrides the configured filter.

use crate::core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "ACCOLADE_LOG";

pub fn filter_for(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(config))
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}
