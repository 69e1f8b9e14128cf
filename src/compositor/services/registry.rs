//! Compositor service: the mount registry and its lifecycle.

use super::error::{CompositorError, CompositorResult};
use super::mount::{Mount, MountHandle, MountOptions};
use super::router::{NotificationRouter, NotificationSubscription};
use super::teardown::{LeakLog, duration_millis};
use crate::compositor::config::CompositorConfig;
use crate::compositor::domain::{
    ADMIN_PREFIX, CompositorState, META_PREFIX, MountChange, MountPrefix, MountSnapshot,
    MountState, Notification, QualifiedTool, RESOURCES_PREFIX, ResourceLeak, ShutdownReport,
    TeardownFailure, TeardownFailureKind, qualify, strip_prefix,
};
use crate::compositor::adapters::memory::InProcessConnector;
use crate::compositor::pinned::{AdminServer, MetaServer, ResourcesConnector};
use crate::compositor::ports::{ChildConnector, ChildSession};
use futures::future::join_all;
use indexmap::IndexMap;
use mockable::{Clock, DefaultClock};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::sync::MutexGuard;
use tracing::{debug, info, warn};

type MutationGuard<'a> = MutexGuard<'a, ()>;

/// What [`Compositor::mount_many`] does when one of its mounts fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MountErrorPolicy {
    /// Return the first error, in input order.
    #[default]
    Raise,
    /// Report every error in the per-prefix results.
    Collect,
}

/// Per-prefix outcome of [`Compositor::mount_many`]; `None` means mounted.
pub type MountResults = IndexMap<String, Option<CompositorError>>;

struct CompositorInner {
    config: CompositorConfig,
    clock: Arc<dyn Clock + Send + Sync>,
    mutation_lock: tokio::sync::Mutex<()>,
    state: RwLock<CompositorState>,
    mounts: RwLock<IndexMap<MountPrefix, Arc<Mount>>>,
    router: NotificationRouter,
    failures: Mutex<Vec<TeardownFailure>>,
    leaks: LeakLog,
}

impl Drop for CompositorInner {
    fn drop(&mut self) {
        let state = *self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mounts = self.mounts.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state == CompositorState::Active && !mounts.is_empty() {
            let prefixes: Vec<&str> = mounts.keys().map(MountPrefix::as_str).collect();
            warn!(
                compositor = %self.config.name,
                mounts = ?prefixes,
                "compositor dropped without exit; releasing mount resources in background"
            );
        }
        self.router.close();
    }
}

/// Aggregates child tool servers behind one prefixed namespace.
///
/// The compositor moves through `Created -> Active -> Closed`. Mounting,
/// unmounting, entering and exiting are serialised by one async mutation
/// lock. Routing never takes that lock and only ever sees mounts whose
/// handshake has finished.
#[derive(Clone)]
pub struct Compositor {
    inner: Arc<CompositorInner>,
}

impl Compositor {
    /// Creates a compositor in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::Config`] when the configuration is
    /// invalid.
    pub fn new(config: CompositorConfig) -> CompositorResult<Self> {
        Self::with_clock(config, Arc::new(DefaultClock))
    }

    /// Creates a compositor with an injected clock.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::Config`] when the configuration is
    /// invalid.
    pub fn with_clock(
        config: CompositorConfig,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> CompositorResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(CompositorInner {
                config,
                clock,
                mutation_lock: tokio::sync::Mutex::new(()),
                state: RwLock::new(CompositorState::Created),
                mounts: RwLock::new(IndexMap::new()),
                router: NotificationRouter::new(),
                failures: Mutex::new(Vec::new()),
                leaks: LeakLog::new(),
            }),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CompositorConfig {
        &self.inner.config
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> CompositorState {
        *self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a weak reference for servers that call back into the
    /// compositor.
    #[must_use]
    pub fn downgrade(&self) -> WeakCompositor {
        WeakCompositor(Arc::downgrade(&self.inner))
    }

    /// Moves `Created -> Active` and mounts the pinned servers.
    ///
    /// Pinned servers go through the same mount path as every other
    /// server while the mutation lock is held. If one fails, everything
    /// mounted so far is torn down and the compositor is `Closed`.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::DoubleEnter`] when already active,
    /// [`CompositorError::UseAfterClose`] when closed, and the pinned
    /// server's error when one fails to mount.
    pub async fn enter(&self) -> CompositorResult<()> {
        let guard = self.inner.mutation_lock.lock().await;
        match self.state() {
            CompositorState::Created => {}
            CompositorState::Active => return Err(CompositorError::DoubleEnter),
            CompositorState::Closed => return Err(CompositorError::UseAfterClose),
        }
        let pinned = self.pinned_connectors()?;
        self.set_state(CompositorState::Active);
        info!(compositor = %self.inner.config.name, "entering compositor");

        for (prefix, connector) in pinned {
            if let Err(err) = self
                .mount_locked(&guard, prefix, connector.as_ref(), true)
                .await
            {
                warn!(
                    compositor = %self.inner.config.name,
                    error = %err,
                    "pinned server failed to mount; closing compositor"
                );
                let drained = self.drain_locked(&guard);
                drop(guard);
                let report = self.close_drained(drained).await;
                debug!(failures = report.failures.len(), "rolled back pinned mounts");
                return Err(err);
            }
        }
        Ok(())
    }

    fn pinned_connectors(&self) -> CompositorResult<Vec<(MountPrefix, Box<dyn ChildConnector>)>> {
        let weak = self.downgrade();
        let resources: Box<dyn ChildConnector> = Box::new(ResourcesConnector::new(weak.clone()));
        let meta: Box<dyn ChildConnector> = Box::new(InProcessConnector::new(Arc::new(
            MetaServer::new(weak.clone()),
        )));
        let mut connectors = vec![
            (MountPrefix::new(RESOURCES_PREFIX)?, resources),
            (MountPrefix::new(META_PREFIX)?, meta),
        ];
        if self.inner.config.enable_admin {
            let admin: Box<dyn ChildConnector> =
                Box::new(InProcessConnector::new(Arc::new(AdminServer::new(weak))));
            connectors.push((MountPrefix::new(ADMIN_PREFIX)?, admin));
        }
        Ok(connectors)
    }

    /// Mounts a child server under `prefix`.
    ///
    /// The handshake runs under the mutation lock. A failed handshake still
    /// registers the mount as `Failed` so introspection can show why; its
    /// prefix stays taken until it is unmounted.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::InvalidPrefix`],
    /// [`CompositorError::ReservedPrefix`],
    /// [`CompositorError::DuplicatePrefix`],
    /// [`CompositorError::HandshakeFailed`], or a lifecycle error when the
    /// compositor is not active.
    pub async fn mount(
        &self,
        prefix: &str,
        connector: &dyn ChildConnector,
    ) -> CompositorResult<MountHandle> {
        let validated = MountPrefix::new(prefix)?;
        if validated.is_reserved() {
            return Err(CompositorError::ReservedPrefix(validated));
        }
        let guard = self.inner.mutation_lock.lock().await;
        self.mount_locked(&guard, validated, connector, false).await
    }

    /// Mounts several child servers concurrently.
    ///
    /// Each entry goes through [`Compositor::mount`]; handshakes still take
    /// the mutation lock one at a time. Results are keyed by prefix in
    /// input order. Mounts that succeed stay mounted whichever policy is
    /// chosen.
    ///
    /// # Errors
    ///
    /// With [`MountErrorPolicy::Raise`], returns the first failed mount's
    /// error in input order.
    pub async fn mount_many<'a, I>(
        &self,
        servers: I,
        on_error: MountErrorPolicy,
    ) -> CompositorResult<MountResults>
    where
        I: IntoIterator<Item = (&'a str, &'a dyn ChildConnector)>,
    {
        let outcomes = join_all(servers.into_iter().map(|(prefix, connector)| async move {
            (prefix, self.mount(prefix, connector).await)
        }))
        .await;
        let mut results = MountResults::new();
        for (prefix, outcome) in outcomes {
            match outcome {
                Ok(_) => {
                    results.insert(prefix.to_owned(), None);
                }
                Err(err) => {
                    warn!(prefix = %prefix, error = %err, "batch mount failed");
                    if on_error == MountErrorPolicy::Raise {
                        return Err(err);
                    }
                    results.insert(prefix.to_owned(), Some(err));
                }
            }
        }
        Ok(results)
    }

    async fn mount_locked(
        &self,
        _guard: &MutationGuard<'_>,
        prefix: MountPrefix,
        connector: &dyn ChildConnector,
        pinned: bool,
    ) -> CompositorResult<MountHandle> {
        self.ensure_active()?;
        if self
            .read_mounts()
            .get(&prefix)
            .is_some_and(|existing| existing.state() != MountState::Closed)
        {
            return Err(CompositorError::DuplicatePrefix(prefix));
        }

        let mount = Arc::new(Mount::new(
            prefix.clone(),
            pinned,
            self.mount_options(),
            Arc::clone(&self.inner.clock),
            self.inner.leaks.clone(),
        ));
        let activation = mount.activate(connector).await;
        self.write_mounts()
            .insert(prefix.clone(), Arc::clone(&mount));

        match activation {
            Ok(_) => {
                self.publish_mount_change(&prefix, MountChange::Mounted);
                if let Ok(session) = mount.session() {
                    self.inner
                        .router
                        .attach(prefix.clone(), mount.id(), session.notifications());
                }
                info!(prefix = %prefix, mount_id = %mount.id(), pinned, "mounted server");
                Ok(MountHandle::new(mount))
            }
            Err(err) => {
                self.publish_mount_change(&prefix, MountChange::Failed);
                warn!(prefix = %prefix, error = %err, "mount registered as failed");
                Err(err)
            }
        }
    }

    /// Removes the mount under `prefix` and tears it down.
    ///
    /// The entry is removed and its notification feed detached under the
    /// mutation lock; teardown runs after the lock is released, bounded by
    /// the teardown timeout. Teardown runs on its own task: cancelling the
    /// caller stops the wait, not the teardown.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::UnknownMount`],
    /// [`CompositorError::PinnedMount`], a lifecycle error, or the
    /// teardown failure ([`CompositorError::TeardownFailed`] or
    /// [`CompositorError::TeardownTimedOut`]).
    pub async fn unmount(&self, prefix: &str) -> CompositorResult<()> {
        let guard = self.inner.mutation_lock.lock().await;
        self.ensure_active()?;
        let mount = self
            .read_mounts()
            .get(prefix)
            .cloned()
            .ok_or_else(|| CompositorError::UnknownMount(prefix.to_owned()))?;
        if mount.is_pinned() {
            return Err(CompositorError::PinnedMount(mount.prefix().clone()));
        }
        self.write_mounts().shift_remove(prefix);
        self.inner.router.detach(mount.prefix(), mount.id());
        self.publish_mount_change(mount.prefix(), MountChange::Unmounted);
        drop(guard);

        info!(prefix = %mount.prefix(), mount_id = %mount.id(), "unmounted server");
        self.teardown_shielded(mount)
            .await
            .map_err(CompositorError::from)
    }

    /// Forwards `operation` to the mount under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::UnknownMount`],
    /// [`CompositorError::MountNotReady`], a lifecycle error, or the
    /// child's error wrapped in [`CompositorError::Session`].
    pub async fn route(
        &self,
        prefix: &str,
        operation: &str,
        payload: Value,
    ) -> CompositorResult<Value> {
        let session = self.session_for(prefix)?;
        session
            .invoke(operation, payload)
            .await
            .map_err(|source| CompositorError::Session {
                prefix: prefix.to_owned(),
                source,
            })
    }

    /// Like [`Compositor::route`], aborted after `limit`.
    ///
    /// Only this call is cancelled; registry state is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::RouteTimedOut`] when `limit` elapses, or
    /// any error [`Compositor::route`] returns.
    pub async fn route_with_timeout(
        &self,
        prefix: &str,
        operation: &str,
        payload: Value,
        limit: Duration,
    ) -> CompositorResult<Value> {
        tokio::time::timeout(limit, self.route(prefix, operation, payload))
            .await
            .unwrap_or_else(|_| {
                Err(CompositorError::RouteTimedOut {
                    prefix: prefix.to_owned(),
                    operation: operation.to_owned(),
                    timeout_ms: duration_millis(limit),
                })
            })
    }

    /// Routes a qualified `{prefix}_{operation}` name.
    ///
    /// The longest mounted prefix that matches wins, so `git_ro_status`
    /// goes to `git_ro` even when `git` is also mounted.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::UnknownTool`] when no mounted prefix
    /// matches, or any error [`Compositor::route`] returns.
    pub async fn call_tool(&self, qualified: &str, payload: Value) -> CompositorResult<Value> {
        let (prefix, operation) = self
            .resolve(qualified)
            .ok_or_else(|| CompositorError::UnknownTool(qualified.to_owned()))?;
        self.route(prefix.as_str(), &operation, payload).await
    }

    fn resolve(&self, qualified: &str) -> Option<(MountPrefix, String)> {
        self.read_mounts()
            .keys()
            .filter_map(|prefix| {
                strip_prefix(qualified, prefix).map(|operation| (prefix.clone(), operation.to_owned()))
            })
            .max_by_key(|(prefix, _)| prefix.as_str().len())
    }

    /// Subscribes to prefixed change events and mount-set changes.
    #[must_use]
    pub fn subscribe(&self) -> NotificationSubscription {
        self.inner.router.subscribe()
    }

    /// Snapshots of every registered mount, in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<MountSnapshot> {
        self.read_mounts()
            .values()
            .map(|mount| mount.snapshot())
            .collect()
    }

    /// Registered prefixes, in registration order.
    #[must_use]
    pub fn prefixes(&self) -> Vec<MountPrefix> {
        self.read_mounts().keys().cloned().collect()
    }

    /// State of the mount under `prefix`, if registered.
    #[must_use]
    pub fn mount_state(&self, prefix: &str) -> Option<MountState> {
        self.read_mounts().get(prefix).map(|mount| mount.state())
    }

    /// Handle to the mount under `prefix`, if registered.
    #[must_use]
    pub fn handle(&self, prefix: &str) -> Option<MountHandle> {
        self.read_mounts()
            .get(prefix)
            .map(|mount| MountHandle::new(Arc::clone(mount)))
    }

    /// Qualified tools of every active mount.
    #[must_use]
    pub fn tools(&self) -> Vec<QualifiedTool> {
        let mounts: Vec<Arc<Mount>> = self.read_mounts().values().cloned().collect();
        mounts
            .iter()
            .filter(|mount| mount.state() == MountState::Active)
            .filter_map(|mount| mount.server_info().map(|info| (mount.prefix().clone(), info)))
            .flat_map(|(prefix, info)| {
                info.tools.into_iter().map(move |tool| QualifiedTool {
                    name: qualify(&prefix, &tool.name),
                    prefix: prefix.clone(),
                    tool: tool.name,
                    description: tool.description,
                })
            })
            .collect()
    }

    /// Every teardown failure observed by `unmount` or `exit`.
    #[must_use]
    pub fn teardown_failures(&self) -> Vec<TeardownFailure> {
        self.inner
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every resource leak recorded so far.
    #[must_use]
    pub fn leaks(&self) -> Vec<ResourceLeak> {
        self.inner.leaks.snapshot()
    }

    /// Moves `Active -> Closed` and tears every mount down.
    ///
    /// Mounts are drained under the mutation lock in reverse registration
    /// order, pinned ones included, then torn down one at a time with the
    /// teardown timeout each. A mount whose teardown times out is abandoned
    /// and the next one proceeds. Failures are collected, not returned.
    /// Once the mounts are drained, teardown runs on its own task, so a
    /// cancelled `exit` still releases everything in the background.
    ///
    /// # Errors
    ///
    /// Returns [`CompositorError::NotEntered`] before `enter` and
    /// [`CompositorError::UseAfterClose`] when already closed.
    pub async fn exit(&self) -> CompositorResult<ShutdownReport> {
        let guard = self.inner.mutation_lock.lock().await;
        match self.state() {
            CompositorState::Active => {}
            CompositorState::Created => return Err(CompositorError::NotEntered),
            CompositorState::Closed => return Err(CompositorError::UseAfterClose),
        }
        info!(compositor = %self.inner.config.name, "exiting compositor");
        let drained = self.drain_locked(&guard);
        drop(guard);

        let report = self.close_drained(drained).await;
        if report.is_clean() {
            info!(
                compositor = %self.inner.config.name,
                mounts = report.mounts.len(),
                "compositor closed"
            );
        } else {
            warn!(
                compositor = %self.inner.config.name,
                failures = report.failures.len(),
                leaks = report.leaks.len(),
                "compositor closed with teardown failures"
            );
        }
        Ok(report)
    }

    fn drain_locked(&self, _guard: &MutationGuard<'_>) -> Vec<Arc<Mount>> {
        self.set_state(CompositorState::Closed);
        let drained: Vec<Arc<Mount>> = {
            let mut mounts = self.write_mounts();
            mounts.drain(..).rev().map(|(_, mount)| mount).collect()
        };
        for mount in &drained {
            self.inner.router.detach(mount.prefix(), mount.id());
            self.publish_mount_change(mount.prefix(), MountChange::Unmounted);
        }
        drained
    }

    /// Tears `drained` down and closes the router on a spawned task.
    async fn close_drained(&self, drained: Vec<Arc<Mount>>) -> ShutdownReport {
        let compositor = self.clone();
        let task = tokio::spawn(async move {
            let report = compositor.teardown_drained(drained).await;
            compositor.inner.router.close();
            report
        });
        match task.await {
            Ok(report) => report,
            Err(join_error) => {
                warn!(error = %join_error, "shutdown teardown task failed");
                self.inner.router.close();
                ShutdownReport {
                    leaks: self.inner.leaks.snapshot(),
                    ..ShutdownReport::default()
                }
            }
        }
    }

    /// Tears one unmounted mount down on a spawned task.
    async fn teardown_shielded(&self, mount: Arc<Mount>) -> Result<(), TeardownFailure> {
        let mount_id = mount.id();
        let prefix = mount.prefix().clone();
        let compositor = self.clone();
        let task = tokio::spawn(async move { compositor.teardown_mount(&mount).await });
        task.await.unwrap_or_else(|join_error| {
            Err(TeardownFailure {
                mount_id,
                prefix,
                kind: TeardownFailureKind::Released {
                    errors: vec![format!("teardown task failed: {join_error}")],
                },
            })
        })
    }

    async fn teardown_drained(&self, drained: Vec<Arc<Mount>>) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for mount in drained {
            if let Err(failure) = self.teardown_mount(&mount).await {
                report.failures.push(failure);
            }
            report.mounts.push(mount.snapshot());
        }
        report.leaks = self.inner.leaks.snapshot();
        report
    }

    async fn teardown_mount(&self, mount: &Mount) -> Result<(), TeardownFailure> {
        let limit = self.inner.config.teardown_timeout();
        let attempt = tokio::time::timeout(limit, mount.teardown()).await;
        let kind = match attempt {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(CompositorError::TeardownFailed { errors, .. })) => {
                TeardownFailureKind::Released { errors }
            }
            Ok(Err(other)) => TeardownFailureKind::Released {
                errors: vec![other.to_string()],
            },
            Err(_) => {
                mount.abandon();
                TeardownFailureKind::TimedOut {
                    timeout_ms: duration_millis(limit),
                }
            }
        };
        let failure = TeardownFailure {
            mount_id: mount.id(),
            prefix: mount.prefix().clone(),
            kind,
        };
        warn!(prefix = %failure.prefix, failure = ?failure.kind, "mount teardown failed");
        self.inner
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure.clone());
        Err(failure)
    }

    pub(crate) fn session_for(&self, prefix: &str) -> CompositorResult<Arc<dyn ChildSession>> {
        self.ensure_active()?;
        let mount = self
            .read_mounts()
            .get(prefix)
            .cloned()
            .ok_or_else(|| CompositorError::UnknownMount(prefix.to_owned()))?;
        mount.session()
    }

    fn ensure_active(&self) -> CompositorResult<()> {
        match self.state() {
            CompositorState::Active => Ok(()),
            CompositorState::Created => Err(CompositorError::NotEntered),
            CompositorState::Closed => Err(CompositorError::UseAfterClose),
        }
    }

    fn publish_mount_change(&self, prefix: &MountPrefix, change: MountChange) {
        self.inner.router.publish(&Notification::MountSetChanged {
            prefix: prefix.clone(),
            change,
        });
    }

    fn mount_options(&self) -> MountOptions {
        let config = &self.inner.config;
        MountOptions::default()
            .with_handshake_timeout(config.handshake_timeout())
            .with_session_close_timeout(config.session_close_timeout())
            .with_release_timeout(config.release_timeout())
    }

    fn set_state(&self, next: CompositorState) {
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(from = %*state, to = %next, "compositor state transition");
        *state = next;
    }

    fn read_mounts(&self) -> RwLockReadGuard<'_, IndexMap<MountPrefix, Arc<Mount>>> {
        self.inner
            .mounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_mounts(&self) -> RwLockWriteGuard<'_, IndexMap<MountPrefix, Arc<Mount>>> {
        self.inner
            .mounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Compositor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Compositor")
            .field("name", &self.inner.config.name)
            .field("state", &self.state())
            .field("mounts", &self.prefixes())
            .finish()
    }
}

/// Non-owning reference to a [`Compositor`].
#[derive(Clone, Default)]
pub struct WeakCompositor(Weak<CompositorInner>);

impl WeakCompositor {
    /// Returns the compositor if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Compositor> {
        self.0.upgrade().map(|inner| Compositor { inner })
    }
}

impl fmt::Debug for WeakCompositor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WeakCompositor")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}
