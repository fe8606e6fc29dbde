//! Structured logging setup (spec ambient stack: every long-running
//! component — `session`'s ingest loop, `purge`'s reclamation pass,
//! `regenerator`'s recovery walk — logs through `tracing`, initialized here
//! once at process start).

#![deny(unsafe_code)]

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Errors from telemetry setup.
#[derive(Debug, Error)]
pub enum Error {
    /// A global subscriber was already installed (e.g. by a test harness).
    #[error("global tracing subscriber already set")]
    AlreadyInitialized,
}

/// Initialize JSON-formatted structured logging with an env filter
/// (`RUST_LOG`, e.g. `"info,regenerator=debug"`; defaults to `"info"`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_json_logging() {
    let _ = try_init_json_logging();
}

/// Like [`init_json_logging`] but reports whether a subscriber was already
/// installed, for callers (tests) that want to know.
pub fn try_init_json_logging() -> Result<(), Error> {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(|_| Error::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_already_initialized() {
        let _ = try_init_json_logging();
        assert!(matches!(try_init_json_logging(), Err(Error::AlreadyInitialized)));
    }
}
