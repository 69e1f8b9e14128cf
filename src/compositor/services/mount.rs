//! A mounted child server together with the resources it owns.

use super::error::{CompositorError, CompositorResult};
use super::teardown::{LeakLog, ReleaseContext, ResourceScope, duration_millis};
use crate::compositor::domain::{
    MountId, MountPrefix, MountSnapshot, MountState, ResourceLeak, ServerInfo,
};
use crate::compositor::ports::{
    ChildConnector, ChildSession, OwnedResource, Persistence, ReleaseError, ReleaseResult,
    SessionError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeouts applied to one mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOptions {
    /// Bound on the connector handshake.
    pub handshake_timeout: Duration,
    /// Bound on the session close call.
    pub session_close_timeout: Duration,
    /// Bound on each asynchronous resource release.
    pub release_timeout: Duration,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            session_close_timeout: Duration::from_secs(2),
            release_timeout: Duration::from_secs(3),
        }
    }
}

impl MountOptions {
    /// Sets the handshake timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the session close timeout.
    #[must_use]
    pub const fn with_session_close_timeout(mut self, timeout: Duration) -> Self {
        self.session_close_timeout = timeout;
        self
    }

    /// Sets the per-resource release timeout.
    #[must_use]
    pub const fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }
}

enum MountPhase {
    Pending,
    Active {
        session: Arc<dyn ChildSession>,
        info: ServerInfo,
    },
    Failed {
        reason: String,
    },
    Closed {
        info: Option<ServerInfo>,
        failure: Option<String>,
    },
}

impl MountPhase {
    const fn state(&self) -> MountState {
        match self {
            Self::Pending => MountState::Pending,
            Self::Active { .. } => MountState::Active,
            Self::Failed { .. } => MountState::Failed,
            Self::Closed { .. } => MountState::Closed,
        }
    }

    fn into_closed(self, failure: Option<String>) -> Self {
        match self {
            Self::Active { info, .. } => Self::Closed {
                info: Some(info),
                failure,
            },
            Self::Failed { reason } => Self::Closed {
                info: None,
                failure: failure.or(Some(reason)),
            },
            Self::Pending => Self::Closed {
                info: None,
                failure,
            },
            closed @ Self::Closed { .. } => closed,
        }
    }
}

struct MountInner {
    phase: MountPhase,
    scope: ResourceScope,
    closed_at: Option<DateTime<Utc>>,
}

/// One mounted child server.
///
/// A mount exclusively owns its session and every resource registered in
/// its scope. Teardown releases them in reverse registration order and is
/// idempotent.
pub struct Mount {
    id: MountId,
    prefix: MountPrefix,
    pinned: bool,
    mounted_at: DateTime<Utc>,
    options: MountOptions,
    clock: Arc<dyn Clock + Send + Sync>,
    context: ReleaseContext,
    inner: Mutex<MountInner>,
    teardown_gate: tokio::sync::Mutex<()>,
}

impl Mount {
    /// Creates a `Pending` mount.
    #[must_use]
    pub fn new(
        prefix: MountPrefix,
        pinned: bool,
        options: MountOptions,
        clock: Arc<dyn Clock + Send + Sync>,
        leaks: LeakLog,
    ) -> Self {
        let context = ReleaseContext::new(prefix.clone(), options.release_timeout, leaks);
        let mounted_at = clock.utc();
        Self {
            id: MountId::new(),
            prefix,
            pinned,
            mounted_at,
            options,
            clock,
            inner: Mutex::new(MountInner {
                phase: MountPhase::Pending,
                scope: ResourceScope::new(context.clone()),
                closed_at: None,
            }),
            context,
            teardown_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the mount instance identifier.
    #[must_use]
    pub const fn id(&self) -> MountId {
        self.id
    }

    /// Returns the mount prefix.
    #[must_use]
    pub const fn prefix(&self) -> &MountPrefix {
        &self.prefix
    }

    /// Returns whether this is a pinned compositor server.
    #[must_use]
    pub const fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MountState {
        self.lock_inner().phase.state()
    }

    /// Returns handshake metadata while the mount is `Active` or after it
    /// closed from `Active`.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        match &self.lock_inner().phase {
            MountPhase::Active { info, .. } => Some(info.clone()),
            MountPhase::Closed { info, .. } => info.clone(),
            MountPhase::Pending | MountPhase::Failed { .. } => None,
        }
    }

    /// Returns the session of an `Active` mount.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::MountNotReady`] in any other state.
    pub fn session(&self) -> CompositorResult<Arc<dyn ChildSession>> {
        match &self.lock_inner().phase {
            MountPhase::Active { session, .. } => Ok(Arc::clone(session)),
            other => Err(CompositorError::MountNotReady {
                prefix: self.prefix.clone(),
                state: other.state(),
            }),
        }
    }

    /// Connects the child and moves to `Active` or `Failed`.
    ///
    /// The connector registers what it acquires in a fresh scope. On
    /// success the session close is registered last, so it runs first on
    /// teardown. On failure everything acquired so far is released before
    /// the mount becomes `Failed`. If this future is dropped, the scope's
    /// drop hands external resources to detached releases.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::HandshakeFailed`] when the connector fails
    /// or exceeds the handshake timeout, and
    /// [`CompositorError::MountNotReady`] when the mount is not `Pending`.
    pub async fn activate(&self, connector: &dyn ChildConnector) -> CompositorResult<ServerInfo> {
        {
            let inner = self.lock_inner();
            let state = inner.phase.state();
            if state != MountState::Pending {
                return Err(CompositorError::MountNotReady {
                    prefix: self.prefix.clone(),
                    state,
                });
            }
        }

        debug!(prefix = %self.prefix, mount_id = %self.id, "connecting child server");
        let mut scope = ResourceScope::new(self.context.clone());
        let attempt =
            tokio::time::timeout(self.options.handshake_timeout, connector.connect(&mut scope))
                .await;
        let source = match attempt {
            Ok(Ok(connected)) => {
                scope.register(SessionCloser {
                    session: Arc::clone(&connected.session),
                    timeout: self.options.session_close_timeout,
                });
                return self.finish_activation(scope, connected.session, connected.info);
            }
            Ok(Err(err)) => err,
            Err(_) => SessionError::TimedOut {
                operation: "handshake".to_owned(),
                timeout_ms: duration_millis(self.options.handshake_timeout),
            },
        };

        warn!(prefix = %self.prefix, error = %source, "child handshake failed");
        let release_failures = scope.release_all().await;
        if !release_failures.is_empty() {
            warn!(
                prefix = %self.prefix,
                failures = ?release_failures,
                "cleanup after failed handshake reported errors"
            );
        }
        {
            let mut inner = self.lock_inner();
            if matches!(inner.phase, MountPhase::Pending) {
                inner.phase = MountPhase::Failed {
                    reason: source.to_string(),
                };
            }
        }
        Err(CompositorError::HandshakeFailed {
            prefix: self.prefix.clone(),
            source,
        })
    }

    fn finish_activation(
        &self,
        scope: ResourceScope,
        session: Arc<dyn ChildSession>,
        info: ServerInfo,
    ) -> CompositorResult<ServerInfo> {
        let mut inner = self.lock_inner();
        if !matches!(inner.phase, MountPhase::Pending) {
            let state = inner.phase.state();
            drop(inner);
            drop(scope);
            return Err(CompositorError::MountNotReady {
                prefix: self.prefix.clone(),
                state,
            });
        }
        let displaced = std::mem::replace(&mut inner.scope, scope);
        inner.phase = MountPhase::Active {
            session,
            info: info.clone(),
        };
        drop(inner);
        drop(displaced);
        info!(
            prefix = %self.prefix,
            mount_id = %self.id,
            server = %info.name,
            version = %info.version,
            "mount active"
        );
        Ok(info)
    }

    /// Registers a resource acquired after activation.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::MountClosed`] when the mount is already
    /// closed; the resource is released before returning.
    pub fn register_resource<R>(&self, resource: R) -> CompositorResult<()>
    where
        R: OwnedResource + 'static,
    {
        let shared: Arc<dyn OwnedResource> = Arc::new(resource);
        let mut inner = self.lock_inner();
        if matches!(inner.phase, MountPhase::Closed { .. }) {
            drop(inner);
            self.context.release_detached(shared);
            return Err(CompositorError::MountClosed(self.prefix.clone()));
        }
        inner.scope.register_shared(shared);
        Ok(())
    }

    /// Releases every registered resource in reverse order, then moves to
    /// `Closed`.
    ///
    /// Concurrent callers are serialised; a caller arriving after the mount
    /// closed returns `Ok(())`. Cancelling this future leaves unreleased
    /// resources in the scope, where a later teardown or the mount's drop
    /// picks them up. External releases already started keep running.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::TeardownFailed`] when any release failed
    /// (the mount is still `Closed`) and [`CompositorError::MountNotReady`]
    /// for a `Pending` mount.
    pub async fn teardown(&self) -> CompositorResult<()> {
        let _gate = self.teardown_gate.lock().await;

        match self.state() {
            MountState::Closed => return Ok(()),
            MountState::Pending => {
                return Err(CompositorError::MountNotReady {
                    prefix: self.prefix.clone(),
                    state: MountState::Pending,
                });
            }
            MountState::Active | MountState::Failed => {}
        }

        debug!(prefix = %self.prefix, mount_id = %self.id, "tearing down mount");
        let mut failures = Vec::new();
        loop {
            let next = self.lock_inner().scope.take_last();
            let Some(resource) = next else {
                break;
            };
            let outcome = self.context.release(resource).await;
            failures.extend(outcome.failure_message());
        }

        let failure = (!failures.is_empty()).then(|| failures.join("; "));
        self.close(failure);
        info!(prefix = %self.prefix, mount_id = %self.id, "mount closed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CompositorError::TeardownFailed {
                prefix: self.prefix.clone(),
                errors: failures,
            })
        }
    }

    /// Force-closes the mount after a teardown timeout.
    ///
    /// Remaining resources are handed to detached releases. Returns the
    /// labels of the resources that were handed off.
    pub fn abandon(&self) -> Vec<String> {
        let remaining = {
            let mut inner = self.lock_inner();
            let scope = std::mem::replace(
                &mut inner.scope,
                ResourceScope::new(self.context.clone()),
            );
            let phase = std::mem::replace(&mut inner.phase, MountPhase::Pending);
            inner.phase = phase.into_closed(Some("abandoned after teardown timeout".to_owned()));
            if inner.closed_at.is_none() {
                inner.closed_at = Some(self.clock.utc());
            }
            scope
        };
        let labels = remaining.labels();
        warn!(
            prefix = %self.prefix,
            mount_id = %self.id,
            resources = ?labels,
            "abandoning mount; remaining resources released in background"
        );
        drop(remaining);
        labels
    }

    /// Returns a point-in-time view of the mount.
    #[must_use]
    pub fn snapshot(&self) -> MountSnapshot {
        let inner = self.lock_inner();
        let (error, server) = match &inner.phase {
            MountPhase::Pending => (None, None),
            MountPhase::Active { info, .. } => (None, Some(info.clone())),
            MountPhase::Failed { reason } => (Some(reason.clone()), None),
            MountPhase::Closed { info, failure } => (failure.clone(), info.clone()),
        };
        MountSnapshot {
            id: self.id,
            prefix: self.prefix.clone(),
            pinned: self.pinned,
            state: inner.phase.state(),
            error,
            server,
            resources: inner.scope.len(),
            mounted_at: self.mounted_at,
            closed_at: inner.closed_at,
        }
    }

    /// Returns leaks recorded for this mount's resources.
    #[must_use]
    pub fn leaks(&self) -> Vec<ResourceLeak> {
        self.context
            .leaks()
            .snapshot()
            .into_iter()
            .filter(|leak| leak.prefix == self.prefix)
            .collect()
    }

    fn close(&self, failure: Option<String>) {
        let mut inner = self.lock_inner();
        let phase = std::mem::replace(&mut inner.phase, MountPhase::Pending);
        inner.phase = phase.into_closed(failure);
        inner.closed_at = Some(self.clock.utc());
    }

    fn lock_inner(&self) -> MutexGuard<'_, MountInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Mount")
            .field("id", &self.id)
            .field("prefix", &self.prefix)
            .field("pinned", &self.pinned)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Cloneable handle to a registered mount.
#[derive(Debug, Clone)]
pub struct MountHandle(Arc<Mount>);

impl MountHandle {
    pub(crate) const fn new(mount: Arc<Mount>) -> Self {
        Self(mount)
    }

    /// Returns the mount instance identifier.
    #[must_use]
    pub fn id(&self) -> MountId {
        self.0.id()
    }

    /// Returns the mount prefix.
    #[must_use]
    pub fn prefix(&self) -> &MountPrefix {
        self.0.prefix()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MountState {
        self.0.state()
    }

    /// Returns whether this is a pinned compositor server.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.0.is_pinned()
    }

    /// Returns a point-in-time view of the mount.
    #[must_use]
    pub fn snapshot(&self) -> MountSnapshot {
        self.0.snapshot()
    }

    /// Returns handshake metadata.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.0.server_info()
    }

    /// Registers a resource acquired after activation.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::MountClosed`] when the mount is closed.
    pub fn register_resource<R>(&self, resource: R) -> CompositorResult<()>
    where
        R: OwnedResource + 'static,
    {
        self.0.register_resource(resource)
    }
}

/// Closes a mount's session as the first step of teardown.
struct SessionCloser {
    session: Arc<dyn ChildSession>,
    timeout: Duration,
}

#[async_trait]
impl OwnedResource for SessionCloser {
    fn label(&self) -> &str {
        "session"
    }

    fn persistence(&self) -> Persistence {
        Persistence::Ephemeral
    }

    async fn release(&self) -> ReleaseResult<()> {
        match tokio::time::timeout(self.timeout, self.session.close()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ReleaseError::failed(err)),
            Err(_) => Err(ReleaseError::TimedOut {
                resource: "session".to_owned(),
                timeout_ms: duration_millis(self.timeout),
            }),
        }
    }
}
