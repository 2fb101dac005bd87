//! Tracing setup
//!
//! Installs a `tracing-subscriber` fmt layer filtered by `RUST_LOG`, falling back to
//! the configured `application.log_level`. Script `print()` and `api.log()` output
//! arrives under the `script` target, so `RUST_LOG=script=debug` isolates it.
//!
//! # Example
//! ```no_run
//! use hioki_daq::logging::{self, OutputFormat};
//!
//! logging::init("info", OutputFormat::Compact)?;
//! tracing::info!(host = "192.168.1.200", "Connecting");
//! # Ok::<(), hioki_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, coloured output for interactive use
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// Newline-delimited JSON
    Json,
}

/// Parse a level name such as `info` or `DEBUG`.
pub fn parse_log_level(level: &str) -> AppResult<Level> {
    Level::from_str(level)
        .map_err(|_| DaqError::Configuration(format!("Invalid log level '{level}'")))
}

/// Install the global subscriber.
///
/// Idempotent: a second call, or a call after a test harness installed its own
/// subscriber, returns `Ok(())`.
pub fn init(level: &str, format: OutputFormat) -> AppResult<()> {
    let level = parse_log_level(level)?;
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()))
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        OutputFormat::Pretty => fmt::layer().pretty().with_filter(filter()).boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_target(true)
            .with_filter(filter())
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(filter())
            .boxed(),
    };

    // Already initialised is fine.
    let _ = tracing_subscriber::registry().with(layer).try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    // `test_init_is_idempotent` lives in `tests/logging_init.rs`: it installs the
    // process-global subscriber, which would clash with `#[traced_test]` in this binary.
}
