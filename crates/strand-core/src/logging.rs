//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level so operators can
//! raise verbosity for a single module without editing settings.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Errors from subscriber installation.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter {
        /// Offending directive.
        filter: String,
        /// Parser message.
        message: String,
    },
    /// A global subscriber is already installed.
    #[error("global subscriber already installed")]
    AlreadyInitialized,
}

/// Build the filter: `RUST_LOG` if set, otherwise `level`.
fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidFilter {
        filter: level.to_owned(),
        message: e.to_string(),
    })
}

/// Install the global subscriber.
///
/// `json` selects the JSON formatter (one object per line) instead of the
/// compact human-readable one.
pub fn init_logging(level: &str, json: bool) -> Result<(), LoggingError> {
    let filter = build_filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().compact().with_target(true)).try_init()
    };
    result.map_err(|_| LoggingError::AlreadyInitialized)
}

/// Install a test-writer subscriber at `debug`. Safe to call from every test.
pub fn init_test_logging() {
    let filter = build_filter("debug").unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}
