//! Read-only views of mounts and shutdown results used for introspection.

use super::{MountId, MountPrefix, MountState, ServerInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of one mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSnapshot {
    /// Mount instance identifier.
    pub id: MountId,
    /// Mount prefix.
    pub prefix: MountPrefix,
    /// Whether the mount is a pinned compositor server.
    pub pinned: bool,
    /// Lifecycle state when the snapshot was taken.
    pub state: MountState,
    /// Failure reason for `Failed` mounts, or the teardown failure for
    /// `Closed` mounts that did not release cleanly.
    pub error: Option<String>,
    /// Handshake metadata for mounts that reached `Active`.
    pub server: Option<ServerInfo>,
    /// Number of owned resources still awaiting release.
    pub resources: usize,
    /// When the mount was created.
    pub mounted_at: DateTime<Utc>,
    /// When the mount reached `Closed`.
    pub closed_at: Option<DateTime<Utc>>,
}

/// A resource whose release could not be confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLeak {
    /// Prefix of the mount that owned the resource.
    pub prefix: MountPrefix,
    /// Resource label.
    pub resource: String,
    /// Why the release could not be confirmed.
    pub reason: String,
}

/// How a mount teardown went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TeardownFailureKind {
    /// Teardown did not finish within the bounded window and the mount was
    /// abandoned.
    TimedOut {
        /// The window, in milliseconds.
        timeout_ms: u64,
    },
    /// Teardown finished but one or more releases reported errors.
    Released {
        /// Release error messages, in release order.
        errors: Vec<String>,
    },
}

/// A teardown failure attributed to one mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownFailure {
    /// Mount instance identifier.
    pub mount_id: MountId,
    /// Mount prefix.
    pub prefix: MountPrefix,
    /// What went wrong.
    pub kind: TeardownFailureKind,
}

impl TeardownFailure {
    /// Returns whether the failure is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, TeardownFailureKind::TimedOut { .. })
    }
}

/// Aggregate result of shutting a compositor down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Final snapshot of every mount, in teardown order.
    pub mounts: Vec<MountSnapshot>,
    /// Teardown failures, in teardown order.
    pub failures: Vec<TeardownFailure>,
    /// Resource leak warnings observed by the time the report was built.
    pub leaks: Vec<ResourceLeak>,
}

impl ShutdownReport {
    /// Returns whether every mount closed without failures or leaks.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.leaks.is_empty()
    }
}
