//! Compositor services: registry, mounts, notification routing, and
//! resource teardown.

pub mod error;
pub mod mount;
pub mod registry;
pub mod router;
pub mod teardown;

pub use error::{CompositorError, CompositorResult};
pub use mount::{Mount, MountHandle, MountOptions};
pub use registry::{Compositor, MountErrorPolicy, MountResults, WeakCompositor};
pub use router::{NotificationRouter, NotificationSubscription};
pub use teardown::{LeakLog, ReleaseContext, ReleaseOutcome, ResourceScope};
