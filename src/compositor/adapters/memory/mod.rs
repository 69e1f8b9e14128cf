//! In-memory adapters: in-process child servers and connectors.

mod echo;
mod in_process;
mod scripted;

pub use echo::EchoServer;
pub use in_process::{InProcessConnector, InProcessSession};
pub use scripted::ScriptedConnector;
