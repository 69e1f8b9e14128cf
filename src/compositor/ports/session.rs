//! Child session port: the logical connection to one mounted server.

use crate::compositor::domain::{
    ChangeEvent, ResourceContents, ResourceDescriptor, ResourceTemplate, ServerInfo,
};
use crate::compositor::services::ResourceScope;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for child session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// A long-lived connection to one child tool server.
///
/// Implementations must be safe to share across tasks: the compositor
/// routes concurrent calls through one session.
#[async_trait]
pub trait ChildSession: Send + Sync {
    /// Invokes `operation` with an opaque JSON payload.
    ///
    /// # Errors
    ///
    /// Returns the child's error unchanged; the compositor does not
    /// reinterpret it.
    async fn invoke(&self, operation: &str, payload: Value) -> SessionResult<Value>;

    /// Returns the stream of change events emitted by the child.
    ///
    /// The compositor calls this once per session. Later calls may return
    /// an empty stream.
    fn notifications(&self) -> BoxStream<'static, ChangeEvent>;

    /// Lists the resources the child exposes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] unless the child implements
    /// resources.
    async fn list_resources(&self) -> SessionResult<Vec<ResourceDescriptor>> {
        Err(SessionError::Unsupported("list_resources".to_owned()))
    }

    /// Lists the resource templates the child exposes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] unless the child implements
    /// resource templates.
    async fn list_resource_templates(&self) -> SessionResult<Vec<ResourceTemplate>> {
        Err(SessionError::Unsupported("list_resource_templates".to_owned()))
    }

    /// Reads one resource.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] unless the child implements
    /// resources.
    async fn read_resource(&self, _uri: &str) -> SessionResult<Vec<ResourceContents>> {
        Err(SessionError::Unsupported("read_resource".to_owned()))
    }

    /// Subscribes to updates for one resource.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] unless the child implements
    /// resource subscriptions.
    async fn subscribe_resource(&self, _uri: &str) -> SessionResult<()> {
        Err(SessionError::Unsupported("subscribe_resource".to_owned()))
    }

    /// Cancels a resource subscription.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] unless the child implements
    /// resource subscriptions.
    async fn unsubscribe_resource(&self, _uri: &str) -> SessionResult<()> {
        Err(SessionError::Unsupported("unsubscribe_resource".to_owned()))
    }

    /// Closes the session.
    ///
    /// Best effort. The compositor bounds this call with a timeout and may
    /// cancel it.
    ///
    /// # Errors
    ///
    /// Returns an error when the child could not be shut down cleanly.
    async fn close(&self) -> SessionResult<()>;
}

/// A freshly connected child: its session plus handshake metadata.
pub struct ConnectedChild {
    /// The session used for routing and notifications.
    pub session: Arc<dyn ChildSession>,
    /// Handshake metadata.
    pub info: ServerInfo,
}

impl ConnectedChild {
    /// Creates a connected child.
    #[must_use]
    pub fn new(session: Arc<dyn ChildSession>, info: ServerInfo) -> Self {
        Self { session, info }
    }
}

impl fmt::Debug for ConnectedChild {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectedChild")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Connects to a child server.
///
/// A connector registers every resource it acquires (processes, helper
/// tasks, containers) in the supplied [`ResourceScope`] as it acquires them,
/// so a failure or cancellation partway through still releases everything
/// acquired so far.
#[async_trait]
pub trait ChildConnector: Send + Sync {
    /// Establishes a session and performs the one-time handshake.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] when the child cannot be reached or the
    /// handshake fails.
    async fn connect(&self, scope: &mut ResourceScope) -> SessionResult<ConnectedChild>;
}

/// Errors reported by child sessions and connectors.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The session has been closed.
    #[error("session is closed")]
    Closed,

    /// The child does not expose the requested operation.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// The child does not implement the requested capability.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The requested resource does not exist.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// The payload could not be interpreted.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The operation ran and reported a failure.
    #[error("tool error: {0}")]
    Tool(String),

    /// The handshake was rejected.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The operation did not finish in time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    TimedOut {
        /// Operation that timed out.
        operation: String,
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Transport or runtime failure.
    #[error("session runtime error: {0}")]
    Runtime(Arc<dyn std::error::Error + Send + Sync>),
}

impl SessionError {
    /// Wraps a transport or runtime error.
    pub fn runtime(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Runtime(Arc::new(err))
    }

    /// Creates a tool error from a message.
    pub fn tool(message: impl Into<String>) -> Self {
        Self::Tool(message.into())
    }
}
