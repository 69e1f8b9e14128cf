//! Connector with scripted acquisition, delay, and failure behaviour.

use super::InProcessConnector;
use crate::compositor::ports::{
    ChildConnector, ConnectedChild, OwnedResource, SessionError, SessionResult, ToolServer,
};
use crate::compositor::services::ResourceScope;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Wraps an in-process server with a scripted handshake.
///
/// On every connect the scripted resources are registered in order, the
/// handshake delay elapses, and then either the scripted failure is
/// returned or the inner server is connected.
#[derive(Clone)]
pub struct ScriptedConnector {
    inner: InProcessConnector,
    resources: Vec<Arc<dyn OwnedResource>>,
    handshake_delay: Option<Duration>,
    failure: Option<String>,
}

impl ScriptedConnector {
    /// Scripts a connect to `server` with no extra behaviour.
    #[must_use]
    pub fn new<S>(server: Arc<S>) -> Self
    where
        S: ToolServer + 'static,
    {
        Self {
            inner: InProcessConnector::new(server),
            resources: Vec::new(),
            handshake_delay: None,
            failure: None,
        }
    }

    /// Registers `resource` in the mount's scope during the handshake.
    #[must_use]
    pub fn with_resource<R>(self, resource: R) -> Self
    where
        R: OwnedResource + 'static,
    {
        self.with_shared_resource(Arc::new(resource))
    }

    /// Registers a shared resource during the handshake.
    #[must_use]
    pub fn with_shared_resource(mut self, resource: Arc<dyn OwnedResource>) -> Self {
        self.resources.push(resource);
        self
    }

    /// Delays the handshake after resources are registered.
    #[must_use]
    pub const fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = Some(delay);
        self
    }

    /// Fails the handshake with `message` after resources are registered.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

#[async_trait]
impl ChildConnector for ScriptedConnector {
    async fn connect(&self, scope: &mut ResourceScope) -> SessionResult<ConnectedChild> {
        for resource in &self.resources {
            scope.register_shared(Arc::clone(resource));
        }
        if let Some(delay) = self.handshake_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(SessionError::Handshake(message.clone()));
        }
        self.inner.connect(scope).await
    }
}
