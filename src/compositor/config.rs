//! Compositor configuration.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default compositor display name.
pub const DEFAULT_NAME: &str = "compositor";

/// Settings for one compositor instance.
///
/// All timeouts are in milliseconds. Unknown fields are rejected when
/// deserialising.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompositorConfig {
    /// Display name used in logs.
    pub name: String,
    /// Bound on each child handshake.
    pub handshake_timeout_ms: u64,
    /// Bound on each mount's teardown during `unmount` and `exit`.
    pub teardown_timeout_ms: u64,
    /// Bound on each asynchronous resource release.
    pub release_timeout_ms: u64,
    /// Bound on closing a child session.
    pub session_close_timeout_ms: u64,
    /// Whether to mount the `compositor_admin` server.
    pub enable_admin: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            handshake_timeout_ms: 30_000,
            teardown_timeout_ms: 5_000,
            release_timeout_ms: 3_000,
            session_close_timeout_ms: 2_000,
            enable_admin: false,
        }
    }
}

impl CompositorConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown fields,
    /// and any error [`CompositorConfig::validate`] reports.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(input).map_err(|err| ConfigError::Parse(Arc::new(err)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an empty name, a zero timeout, or a
    /// release timeout longer than the teardown timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let timeouts = [
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("teardown_timeout_ms", self.teardown_timeout_ms),
            ("release_timeout_ms", self.release_timeout_ms),
            ("session_close_timeout_ms", self.session_close_timeout_ms),
        ];
        if let Some((field, _)) = timeouts.into_iter().find(|&(_, value)| value == 0) {
            return Err(ConfigError::ZeroTimeout(field));
        }
        if self.release_timeout_ms > self.teardown_timeout_ms {
            return Err(ConfigError::ReleaseExceedsTeardown {
                release_timeout_ms: self.release_timeout_ms,
                teardown_timeout_ms: self.teardown_timeout_ms,
            });
        }
        Ok(())
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = millis(timeout);
        self
    }

    /// Sets the per-mount teardown timeout.
    #[must_use]
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout_ms = millis(timeout);
        self
    }

    /// Sets the per-resource release timeout.
    #[must_use]
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout_ms = millis(timeout);
        self
    }

    /// Sets the session close timeout.
    #[must_use]
    pub fn with_session_close_timeout(mut self, timeout: Duration) -> Self {
        self.session_close_timeout_ms = millis(timeout);
        self
    }

    /// Enables or disables the admin server.
    #[must_use]
    pub const fn with_admin(mut self, enabled: bool) -> Self {
        self.enable_admin = enabled;
        self
    }

    /// Handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Per-mount teardown timeout.
    #[must_use]
    pub const fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// Per-resource release timeout.
    #[must_use]
    pub const fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }

    /// Session close timeout.
    #[must_use]
    pub const fn session_close_timeout(&self) -> Duration {
        Duration::from_millis(self.session_close_timeout_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Errors returned while loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The document is not valid configuration JSON.
    #[error("invalid compositor configuration: {0}")]
    Parse(Arc<serde_json::Error>),

    /// The compositor name is blank.
    #[error("compositor name must not be empty")]
    EmptyName,

    /// A timeout is zero.
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    /// A single release may take longer than the whole teardown.
    #[error(
        "release_timeout_ms ({release_timeout_ms}) must not exceed teardown_timeout_ms ({teardown_timeout_ms})"
    )]
    ReleaseExceedsTeardown {
        /// Configured release timeout.
        release_timeout_ms: u64,
        /// Configured teardown timeout.
        teardown_timeout_ms: u64,
    },
}
