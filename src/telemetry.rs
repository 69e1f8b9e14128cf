//! Tracing subscriber setup for binaries and tests embedding the crate.

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive.
pub const LOG_ENV_VAR: &str = "MOSAIC_LOG";

const DEFAULT_FILTER: &str = "info";

/// Installs a formatting subscriber filtered by [`LOG_ENV_VAR`].
///
/// Falls back to `info` when the variable is unset or invalid. Calling it
/// again after a subscriber is installed is a no-op.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if let Err(err) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        debug!(error = %err, "tracing subscriber already installed");
    }
}
