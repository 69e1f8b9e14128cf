//! Shared fixtures for compositor unit tests.

use crate::compositor::config::CompositorConfig;
use crate::compositor::domain::{ChangeEvent, MountPrefix, ServerInfo};
use crate::compositor::ports::{
    ChildConnector, ChildSession, ConnectedChild, OwnedResource, Persistence, ReleaseError,
    ReleaseResult, SessionError, SessionResult,
};
use crate::compositor::services::{Compositor, ResourceScope};
use async_trait::async_trait;
use futures::stream::BoxStream;
use mockall::mock;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mock! {
    pub Session {}

    #[async_trait]
    impl ChildSession for Session {
        async fn invoke(&self, operation: &str, payload: Value) -> SessionResult<Value>;
        fn notifications(&self) -> BoxStream<'static, ChangeEvent>;
        async fn close(&self) -> SessionResult<()>;
    }
}

/// Counters shared between a tracked resource and the test observing it.
#[derive(Debug, Default)]
pub struct ReleaseCounts {
    attempts: AtomicUsize,
    released: AtomicUsize,
    blocking: AtomicUsize,
}

impl ReleaseCounts {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful releases, asynchronous and blocking combined.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn blocking(&self) -> usize {
        self.blocking.load(Ordering::SeqCst)
    }
}

/// Owned resource whose release behaviour is scripted.
#[derive(Debug, Clone)]
pub struct TrackedResource {
    label: String,
    persistence: Persistence,
    delay: Option<Duration>,
    async_error: Option<String>,
    blocking_error: Option<String>,
    order: Option<Arc<Mutex<Vec<String>>>>,
    counts: Arc<ReleaseCounts>,
}

impl TrackedResource {
    pub fn external(label: &str) -> Self {
        Self::with_persistence(label, Persistence::External)
    }

    pub fn ephemeral(label: &str) -> Self {
        Self::with_persistence(label, Persistence::Ephemeral)
    }

    fn with_persistence(label: &str, persistence: Persistence) -> Self {
        Self {
            label: label.to_owned(),
            persistence,
            delay: None,
            async_error: None,
            blocking_error: None,
            order: None,
            counts: Arc::new(ReleaseCounts::default()),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.async_error = Some(message.to_owned());
        self
    }

    pub fn blocking_failing(mut self, message: &str) -> Self {
        self.blocking_error = Some(message.to_owned());
        self
    }

    pub fn recording(mut self, order: &Arc<Mutex<Vec<String>>>) -> Self {
        self.order = Some(Arc::clone(order));
        self
    }

    pub fn counts(&self) -> Arc<ReleaseCounts> {
        Arc::clone(&self.counts)
    }

    fn record(&self) {
        self.counts.released.fetch_add(1, Ordering::SeqCst);
        if let Some(order) = &self.order {
            order
                .lock()
                .expect("order lock should not be poisoned")
                .push(self.label.clone());
        }
    }
}

#[async_trait]
impl OwnedResource for TrackedResource {
    fn label(&self) -> &str {
        &self.label
    }

    fn persistence(&self) -> Persistence {
        self.persistence
    }

    async fn release(&self) -> ReleaseResult<()> {
        self.counts.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.async_error {
            return Err(ReleaseError::rejected(message.clone()));
        }
        self.record();
        Ok(())
    }

    fn release_blocking(&self) -> ReleaseResult<()> {
        self.counts.blocking.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.blocking_error {
            return Err(ReleaseError::rejected(message.clone()));
        }
        self.record();
        Ok(())
    }
}

/// Hands out one prepared session.
pub struct FixedConnector {
    session: Mutex<Option<Arc<dyn ChildSession>>>,
    info: ServerInfo,
}

impl FixedConnector {
    pub fn new(session: impl ChildSession + 'static, info: ServerInfo) -> Self {
        Self {
            session: Mutex::new(Some(Arc::new(session))),
            info,
        }
    }
}

#[async_trait]
impl ChildConnector for FixedConnector {
    async fn connect(&self, _scope: &mut ResourceScope) -> SessionResult<ConnectedChild> {
        let session = self
            .session
            .lock()
            .expect("session lock should not be poisoned")
            .take()
            .ok_or_else(|| SessionError::Handshake("session already handed out".to_owned()))?;
        Ok(ConnectedChild::new(session, self.info.clone()))
    }
}

pub fn prefix(value: &str) -> MountPrefix {
    MountPrefix::new(value).expect("test prefix should be valid")
}

/// Configuration with timeouts short enough for tests.
pub fn fast_config() -> CompositorConfig {
    CompositorConfig::default()
        .with_handshake_timeout(Duration::from_millis(500))
        .with_teardown_timeout(Duration::from_millis(500))
        .with_release_timeout(Duration::from_millis(200))
        .with_session_close_timeout(Duration::from_millis(200))
}

pub async fn entered(config: CompositorConfig) -> Compositor {
    let compositor = Compositor::new(config).expect("config should be valid");
    compositor.enter().await.expect("enter should succeed");
    compositor
}
