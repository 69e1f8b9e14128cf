//! Domain model for the tool-server compositor.
//!
//! Value types only: validated prefixes, lifecycle states, change events,
//! handshake metadata, and introspection snapshots. Nothing here performs
//! I/O or holds a lock.

mod error;
mod event;
mod ids;
mod naming;
mod server;
mod snapshot;
mod state;

pub use error::CompositorDomainError;
pub use event::{ChangeEvent, MountChange, Notification};
pub use ids::{ADMIN_PREFIX, META_PREFIX, MountId, MountPrefix, RESOURCES_PREFIX};
pub use naming::{NAME_SEPARATOR, QualifiedTool, qualify, strip_prefix};
pub use server::{
    ResourceCapabilities, ResourceContents, ResourceDescriptor, ResourceTemplate, ServerInfo,
    ToolDescriptor,
};
pub use snapshot::{
    MountSnapshot, ResourceLeak, ShutdownReport, TeardownFailure, TeardownFailureKind,
};
pub use state::{CompositorState, MountState};
