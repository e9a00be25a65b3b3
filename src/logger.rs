//! Subscriber setup for the `miga` binary.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggerConfig};

/// Install the global subscriber. `RUST_LOG` wins over the configured level;
/// `verbose` forces debug. Calling twice is a no-op.
pub fn init(config: &LoggerConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let _ = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
