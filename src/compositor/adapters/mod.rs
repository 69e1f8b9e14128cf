//! Adapter implementations for compositor ports.

pub mod cleanup;
pub mod memory;
pub mod process;
pub mod task;

pub use cleanup::CleanupAction;
pub use process::{ChildProcessResource, ProcessCommand};
pub use task::TaskResource;
