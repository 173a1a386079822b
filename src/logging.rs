//! Logging setup. stdout carries the JSON-lines protocol, so everything goes
//! to stderr.
//!
//! The filter comes from `LESSOND_LOG`, then `RUST_LOG`, then `info`.

use std::sync::OnceLock;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "LESSOND_LOG";
const DEFAULT_FILTER: &str = "info";

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("invalid log filter {filter:?}: {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing_subscriber::util::TryInitError),
}

pub fn filter_directive() -> String {
    std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging() -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Ok(());
    }
    let directive = filter_directive();
    let env_filter =
        EnvFilter::try_new(&directive).map_err(|source| LogError::InvalidFilter {
            filter: directive.clone(),
            source,
        })?;
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(false),
        )
        .try_init()?;
    let _ = LOGGING_INITIALIZED.set(());
    Ok(())
}
