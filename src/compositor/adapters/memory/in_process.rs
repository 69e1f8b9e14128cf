//! Connector and session for tool servers hosted in the same process.

use crate::compositor::domain::{
    ChangeEvent, ResourceContents, ResourceDescriptor, ResourceTemplate,
};
use crate::compositor::ports::{
    ChangeNotifier, ChildConnector, ChildSession, ConnectedChild, SessionError, SessionResult,
    ToolServer,
};
use crate::compositor::services::ResourceScope;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Connects an in-process [`ToolServer`] as a child.
#[derive(Clone)]
pub struct InProcessConnector {
    server: Arc<dyn ToolServer>,
}

impl InProcessConnector {
    /// Wraps a server.
    #[must_use]
    pub fn new<S>(server: Arc<S>) -> Self
    where
        S: ToolServer + 'static,
    {
        Self { server }
    }

    /// Wraps a server that is already type-erased.
    #[must_use]
    pub fn from_shared(server: Arc<dyn ToolServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl ChildConnector for InProcessConnector {
    async fn connect(&self, _scope: &mut ResourceScope) -> SessionResult<ConnectedChild> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.server.attach(ChangeNotifier::new(sender));
        let session = InProcessSession {
            server: Arc::clone(&self.server),
            closed: AtomicBool::new(false),
            events: Mutex::new(Some(receiver)),
        };
        Ok(ConnectedChild::new(Arc::new(session), self.server.info()))
    }
}

/// Session over an in-process server.
///
/// Calls go straight to the server. Closing the session makes further
/// calls fail with [`SessionError::Closed`].
pub struct InProcessSession {
    server: Arc<dyn ToolServer>,
    closed: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChangeEvent>>>,
}

impl InProcessSession {
    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChildSession for InProcessSession {
    async fn invoke(&self, operation: &str, payload: Value) -> SessionResult<Value> {
        self.ensure_open()?;
        self.server.call_tool(operation, payload).await
    }

    fn notifications(&self) -> BoxStream<'static, ChangeEvent> {
        let receiver = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        receiver.map_or_else(
            || stream::empty().boxed(),
            |events| {
                stream::unfold(events, |mut events| async move {
                    events.recv().await.map(|event| (event, events))
                })
                .boxed()
            },
        )
    }

    async fn list_resources(&self) -> SessionResult<Vec<ResourceDescriptor>> {
        self.ensure_open()?;
        self.server.list_resources().await
    }

    async fn list_resource_templates(&self) -> SessionResult<Vec<ResourceTemplate>> {
        self.ensure_open()?;
        self.server.list_resource_templates().await
    }

    async fn read_resource(&self, uri: &str) -> SessionResult<Vec<ResourceContents>> {
        self.ensure_open()?;
        self.server.read_resource(uri).await
    }

    async fn subscribe_resource(&self, uri: &str) -> SessionResult<()> {
        self.ensure_open()?;
        self.server.subscribe_resource(uri).await
    }

    async fn unsubscribe_resource(&self, uri: &str) -> SessionResult<()> {
        self.ensure_open()?;
        self.server.unsubscribe_resource(uri).await
    }

    async fn close(&self) -> SessionResult<()> {
        self.closed.store(true, Ordering::Release);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
