//! Errors returned by compositor services.

use crate::compositor::config::ConfigError;
use crate::compositor::domain::{
    CompositorDomainError, MountPrefix, MountState, TeardownFailure, TeardownFailureKind,
};
use crate::compositor::ports::SessionError;
use thiserror::Error;

/// Result type for compositor operations.
pub type CompositorResult<T> = Result<T, CompositorError>;

/// Errors returned by the compositor and its mounts.
#[derive(Debug, Clone, Error)]
pub enum CompositorError {
    /// The mount prefix failed validation.
    #[error(transparent)]
    InvalidPrefix(#[from] CompositorDomainError),

    /// The prefix belongs to a pinned compositor server.
    #[error("mount prefix '{0}' is reserved for a pinned server")]
    ReservedPrefix(MountPrefix),

    /// A live mount already owns the prefix.
    #[error("mount prefix '{0}' is already in use")]
    DuplicatePrefix(MountPrefix),

    /// No mount is registered under the prefix.
    #[error("unknown mount: {0}")]
    UnknownMount(String),

    /// No mounted prefix matches the qualified tool name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The mount exists but cannot serve requests.
    #[error("mount '{prefix}' is not ready (state: {state})")]
    MountNotReady {
        /// Mount prefix.
        prefix: MountPrefix,
        /// Current mount state.
        state: MountState,
    },

    /// Pinned servers cannot be unmounted by callers.
    #[error("mount '{0}' is pinned and cannot be unmounted")]
    PinnedMount(MountPrefix),

    /// Connecting to the child failed; the mount is recorded as `Failed`.
    #[error("handshake for mount '{prefix}' failed: {source}")]
    HandshakeFailed {
        /// Mount prefix.
        prefix: MountPrefix,
        /// Connector error.
        source: SessionError,
    },

    /// The child returned an error for a routed call.
    #[error("mount '{prefix}' returned an error: {source}")]
    Session {
        /// Mount prefix.
        prefix: String,
        /// Child error, unchanged.
        source: SessionError,
    },

    /// A routed call exceeded its caller-supplied timeout.
    #[error("call to '{prefix}' operation '{operation}' timed out after {timeout_ms}ms")]
    RouteTimedOut {
        /// Mount prefix.
        prefix: String,
        /// Operation name.
        operation: String,
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Teardown finished but some releases failed.
    #[error("teardown of mount '{prefix}' failed: {}", errors.join("; "))]
    TeardownFailed {
        /// Mount prefix.
        prefix: MountPrefix,
        /// Release errors, in release order.
        errors: Vec<String>,
    },

    /// Teardown exceeded the bounded window and the mount was abandoned.
    #[error("teardown of mount '{prefix}' timed out after {timeout_ms}ms")]
    TeardownTimedOut {
        /// Mount prefix.
        prefix: MountPrefix,
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The compositor was entered twice.
    #[error("compositor has already been entered")]
    DoubleEnter,

    /// The compositor has not been entered yet.
    #[error("compositor has not been entered")]
    NotEntered,

    /// The compositor has already been closed.
    #[error("compositor has been closed")]
    UseAfterClose,

    /// A resource was registered on a closed mount; it has been released.
    #[error("mount '{0}' is closed")]
    MountClosed(MountPrefix),

    /// The compositor configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<TeardownFailure> for CompositorError {
    fn from(failure: TeardownFailure) -> Self {
        match failure.kind {
            TeardownFailureKind::TimedOut { timeout_ms } => Self::TeardownTimedOut {
                prefix: failure.prefix,
                timeout_ms,
            },
            TeardownFailureKind::Released { errors } => Self::TeardownFailed {
                prefix: failure.prefix,
                errors,
            },
        }
    }
}
