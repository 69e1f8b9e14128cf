//! Tool-server compositor.
//!
//! A [`services::Compositor`] mounts child tool servers under validated
//! prefixes, routes calls to them, fans their change events out to
//! subscribers, and guarantees that every resource a mount acquired is
//! released on unmount, on exit, or when a caller is cancelled mid
//! teardown.
//!
//! The module follows a hexagonal layout:
//!
//! - [`domain`]: prefixes, states, events, and snapshots
//! - [`ports`]: child session, connector, tool server, and owned resource
//!   contracts
//! - [`services`]: the registry, mounts, teardown, and notification routing
//! - [`adapters`]: in-process servers, child processes, and tasks
//! - [`pinned`]: the servers every compositor mounts for itself

pub mod adapters;
pub mod config;
pub mod domain;
pub mod pinned;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;

pub use config::{CompositorConfig, ConfigError};
pub use services::{Compositor, CompositorError, CompositorResult, MountErrorPolicy};
