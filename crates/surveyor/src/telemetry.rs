//! Tracing subscriber setup
//!
//! The engine only emits `tracing` events; binaries and test harnesses call
//! [`init_tracing`] once to see them.

use crate::config::LogConfig;
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` when set and valid, else the configured
/// directives, else [`crate::config::DEFAULT_LOG_FILTER`].
#[must_use]
pub fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER))
}

/// Install a global `fmt` subscriber writing to stderr.
///
/// Returns `false` if a subscriber was already installed, which makes the
/// call safe to repeat from several tests.
pub fn init_tracing(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_writer(std::io::stderr)
        .with_target(true);
    if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        let config = LogConfig::default().with_filter("surveyor=trace");
        init_tracing(&config);
        assert!(!init_tracing(&config));
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        let config = LogConfig::default().with_filter("surveyor=[");
        let filter = env_filter(&config);
        assert!(!filter.to_string().is_empty());
    }
}
