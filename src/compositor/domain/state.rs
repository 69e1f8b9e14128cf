//! Lifecycle states for the compositor and its mounts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a compositor.
///
/// `Created -> Active -> Closed`; `Closed` is terminal and there is no
/// direct `Created -> Closed` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositorState {
    /// Constructed but not yet entered.
    Created,
    /// Entered; pinned servers are mounted and mounts may be added.
    Active,
    /// Exited; every mount has been torn down.
    Closed,
}

impl CompositorState {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    /// Returns whether transition to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Created, Self::Active) | (Self::Active, Self::Closed)
        )
    }
}

impl fmt::Display for CompositorState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Lifecycle state of a single mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    /// Created; the handshake has not completed.
    Pending,
    /// Handshake succeeded; requests may be routed.
    Active,
    /// Handshake failed; retained for introspection.
    Failed,
    /// Torn down; every owned resource has been released.
    Closed,
}

impl MountState {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// Returns whether requests may be routed to a mount in this state.
    #[must_use]
    pub const fn can_route(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns whether transition to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Active | Self::Failed) | (Self::Active | Self::Failed, Self::Closed)
        )
    }
}

impl fmt::Display for MountState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
