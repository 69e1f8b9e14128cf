//! In-process tool server port.
//!
//! Servers implementing [`ToolServer`] run inside the compositor's process
//! and are mounted through the same path as remote children, via
//! `InProcessConnector`.

use super::session::{SessionError, SessionResult};
use crate::compositor::domain::{
    ChangeEvent, ResourceContents, ResourceDescriptor, ResourceTemplate, ServerInfo,
};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// A tool server hosted in the compositor's process.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Handshake metadata.
    fn info(&self) -> ServerInfo;

    /// Hands the server the notifier for its current session.
    ///
    /// Called on every connect; a re-mounted server receives a fresh
    /// notifier.
    fn attach(&self, _notifier: ChangeNotifier) {}

    /// Runs one operation.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownOperation`] for unknown names and
    /// [`SessionError::Tool`] for operation failures.
    async fn call_tool(&self, name: &str, payload: Value) -> SessionResult<Value>;

    /// Lists exposed resources.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] unless overridden.
    async fn list_resources(&self) -> SessionResult<Vec<ResourceDescriptor>> {
        Err(SessionError::Unsupported("list_resources".to_owned()))
    }

    /// Lists exposed resource templates.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] unless overridden.
    async fn list_resource_templates(&self) -> SessionResult<Vec<ResourceTemplate>> {
        Err(SessionError::Unsupported("list_resource_templates".to_owned()))
    }

    /// Reads one resource.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] unless overridden.
    async fn read_resource(&self, _uri: &str) -> SessionResult<Vec<ResourceContents>> {
        Err(SessionError::Unsupported("read_resource".to_owned()))
    }

    /// Subscribes to one resource.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] unless overridden.
    async fn subscribe_resource(&self, _uri: &str) -> SessionResult<()> {
        Err(SessionError::Unsupported("subscribe_resource".to_owned()))
    }

    /// Cancels a resource subscription.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] unless overridden.
    async fn unsubscribe_resource(&self, _uri: &str) -> SessionResult<()> {
        Err(SessionError::Unsupported("unsubscribe_resource".to_owned()))
    }
}

/// Sender half of an in-process server's change stream.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChangeNotifier {
    /// Wraps a channel sender.
    #[must_use]
    pub const fn new(sender: mpsc::UnboundedSender<ChangeEvent>) -> Self {
        Self { sender }
    }

    /// Emits one change event.
    ///
    /// Returns `false` when the session side has gone away.
    pub fn notify(&self, event: ChangeEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Returns whether the session side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
