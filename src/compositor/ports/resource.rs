//! Owned-resource port: anything a mount must release on teardown.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for resource release.
pub type ReleaseResult<T> = Result<T, ReleaseError>;

/// How a resource behaves when its managing task disappears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// Vanishes with the process or task that owns it (connections, helper
    /// tasks). Release may be cancelled.
    Ephemeral,
    /// Keeps consuming host resources on its own (subprocesses,
    /// containers). Release must survive cancellation.
    External,
}

impl Persistence {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::External => "external",
        }
    }
}

impl fmt::Display for Persistence {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A resource exclusively owned by one mount.
///
/// Each registered resource is released exactly once: either through
/// [`OwnedResource::release`], or, for [`Persistence::External`]
/// resources whose asynchronous release failed or timed out, through
/// [`OwnedResource::release_blocking`].
#[async_trait]
pub trait OwnedResource: Send + Sync {
    /// Human-readable label used in logs and leak reports.
    fn label(&self) -> &str;

    /// Persistence class, which selects the release discipline.
    fn persistence(&self) -> Persistence;

    /// Releases the resource.
    ///
    /// # Errors
    ///
    /// Returns a [`ReleaseError`] when the resource could not be released.
    async fn release(&self) -> ReleaseResult<()>;

    /// Releases the resource synchronously.
    ///
    /// Runs on the blocking pool as a fallback for external resources and
    /// when a scope is dropped outside a runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::NoBlockingRelease`] unless overridden.
    fn release_blocking(&self) -> ReleaseResult<()> {
        Err(ReleaseError::NoBlockingRelease(self.label().to_owned()))
    }
}

/// Errors returned while releasing a resource.
#[derive(Debug, Clone, Error)]
pub enum ReleaseError {
    /// The release failed with an underlying error.
    #[error("release failed: {0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),

    /// The resource refused or could not complete the release.
    #[error("release rejected: {0}")]
    Rejected(String),

    /// The resource has no synchronous release path.
    #[error("no blocking release available for {0}")]
    NoBlockingRelease(String),

    /// A process survived the kill signal past its grace period.
    #[error("{0} is still running after kill")]
    StillRunning(String),

    /// The asynchronous release did not finish in time.
    #[error("release of {resource} timed out after {timeout_ms}ms")]
    TimedOut {
        /// Resource label.
        resource: String,
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },
}

impl ReleaseError {
    /// Wraps an underlying error.
    pub fn failed(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Failed(Arc::new(err))
    }

    /// Creates a rejection from a message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}
