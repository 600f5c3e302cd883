//! Tracing setup for the processor and its binaries.
//!
//! Logs are written to stderr; stdout is left for response bundles. The level
//! filter sits behind a reload layer so a command-line override can replace
//! the configured level after the subscriber is installed.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Installs the global subscriber at the configured level. `RUST_LOG` wins
/// when set and parseable. Later calls leave the first subscriber in place.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let (filter_layer, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Replaces the active level filter. Returns false when no subscriber was
/// installed by [`init_tracing`].
pub fn apply_logging_level(level: &str) -> bool {
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    handle.modify(|filter| *filter = EnvFilter::new(level)).is_ok()
}
