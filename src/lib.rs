//! Mosaic: a process-local compositor for tool servers.
//!
//! Many child tool servers are mounted behind one namespace. Each child is
//! addressed by a prefix, and its operations are exposed as
//! `{prefix}_{operation}`. Mounts own the resources they acquire while
//! connecting (sessions, tasks, child processes), and the compositor
//! releases them on unmount and on exit, bounded by timeouts, even when the
//! caller driving the teardown is cancelled.
//!
//! # Architecture
//!
//! Mosaic follows hexagonal architecture principles:
//!
//! - **Domain**: value types with no infrastructure dependencies
//! - **Ports**: trait contracts for child sessions and owned resources
//! - **Services**: the registry, mount lifecycle, teardown, and routing
//! - **Adapters**: concrete children and resources
//!
//! # Modules
//!
//! - [`compositor`]: mounting, routing, notifications, and teardown
//! - [`telemetry`]: tracing subscriber setup

pub mod compositor;
pub mod telemetry;
