//! Port contracts for the compositor.
//!
//! Ports describe what the compositor needs from child servers and from the
//! resources mounts own, without committing to a transport.

pub mod resource;
pub mod server;
pub mod session;

pub use resource::{OwnedResource, Persistence, ReleaseError, ReleaseResult};
pub use server::{ChangeNotifier, ToolServer};
pub use session::{ChildConnector, ChildSession, ConnectedChild, SessionError, SessionResult};
