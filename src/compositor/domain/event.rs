//! Change events emitted by child servers and notifications re-published by
//! the compositor.

use super::MountPrefix;
use serde::{Deserialize, Serialize};

/// A resource change reported by a child server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// The contents of one resource changed.
    ResourceUpdated {
        /// Unprefixed resource URI as reported by the child.
        uri: String,
    },
    /// The set of resources exposed by the child changed.
    ResourceListChanged,
}

impl ChangeEvent {
    /// Convenience constructor for [`ChangeEvent::ResourceUpdated`].
    #[must_use]
    pub fn updated(uri: impl Into<String>) -> Self {
        Self::ResourceUpdated { uri: uri.into() }
    }
}

/// Kind of change to the set of mounted servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountChange {
    /// A mount became active.
    Mounted,
    /// A mount was registered but its handshake failed.
    Failed,
    /// A mount was removed from the registry.
    Unmounted,
}

/// Notification delivered to compositor subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A child server reported a resource change.
    Resource {
        /// Prefix of the originating mount.
        prefix: MountPrefix,
        /// The child's event.
        event: ChangeEvent,
    },
    /// The set of mounted servers changed.
    MountSetChanged {
        /// Prefix that was added or removed.
        prefix: MountPrefix,
        /// What happened to it.
        change: MountChange,
    },
}

impl Notification {
    /// Returns the prefix the notification is attributed to.
    #[must_use]
    pub const fn prefix(&self) -> &MountPrefix {
        match self {
            Self::Resource { prefix, .. } | Self::MountSetChanged { prefix, .. } => prefix,
        }
    }
}
