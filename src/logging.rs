//! Tracing subscriber initialization for the `embindex` binary.
//!
//! # Priority (highest to lowest)
//!
//! 1. `EMBINDEX_LOG` env var (per-target directives, e.g. `embindex=debug,warn`)
//! 2. `RUST_LOG` env var
//! 3. `--verbose` flag (debug)
//! 4. `logging.level` from settings (default `warn`)

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Env var consulted before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "EMBINDEX_LOG";

/// Build the filter without installing anything.
pub fn build_filter(verbose: bool, configured_level: &str) -> EnvFilter {
    if let Ok(directives) = std::env::var(LOG_ENV_VAR) {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = if verbose { "debug" } else { configured_level };
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber writing to stderr.
///
/// Returns `false` if a subscriber was already installed (tests, embedding hosts).
pub fn init(verbose: bool, configured_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(build_filter(verbose, configured_level))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .is_ok()
}
