//! Scoped acquisition and cancellation-safe release of owned resources.
//!
//! Every resource a mount depends on is registered in a [`ResourceScope`]
//! in acquisition order and released in reverse. Ephemeral resources are
//! released inline and may be cancelled with the caller. External resources
//! are released in a spawned task so dropping the caller's future cannot
//! abort them halfway. That task bounds the asynchronous release with its
//! own timeout and then falls back to
//! [`OwnedResource::release_blocking`] on the blocking pool. A failed
//! fallback is logged and recorded as a [`ResourceLeak`].

use crate::compositor::domain::{MountPrefix, ResourceLeak};
use crate::compositor::ports::{OwnedResource, Persistence, ReleaseError};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

/// Shared, append-only record of resource leaks.
#[derive(Debug, Clone, Default)]
pub struct LeakLog {
    entries: Arc<Mutex<Vec<ResourceLeak>>>,
}

impl LeakLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one leak.
    pub fn record(&self, leak: ResourceLeak) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(leak);
    }

    /// Returns every recorded leak.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ResourceLeak> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns whether no leak has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

/// Result of releasing one resource.
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    /// The asynchronous release succeeded.
    Released,
    /// The asynchronous release failed or timed out and the blocking
    /// fallback succeeded.
    RecoveredByFallback,
    /// An ephemeral release failed or timed out.
    Failed(ReleaseError),
    /// An external release could not be confirmed; recorded as a leak.
    Leaked(ResourceLeak),
}

impl ReleaseOutcome {
    /// Returns the error message for unsuccessful outcomes.
    #[must_use]
    pub fn failure_message(&self) -> Option<String> {
        match self {
            Self::Released | Self::RecoveredByFallback => None,
            Self::Failed(err) => Some(err.to_string()),
            Self::Leaked(leak) => Some(format!("{} leaked: {}", leak.resource, leak.reason)),
        }
    }
}

/// Everything needed to release a resource on behalf of one mount.
#[derive(Debug, Clone)]
pub struct ReleaseContext {
    prefix: MountPrefix,
    release_timeout: Duration,
    leaks: LeakLog,
}

impl ReleaseContext {
    /// Creates a release context.
    #[must_use]
    pub const fn new(prefix: MountPrefix, release_timeout: Duration, leaks: LeakLog) -> Self {
        Self {
            prefix,
            release_timeout,
            leaks,
        }
    }

    /// Returns the owning mount's prefix.
    #[must_use]
    pub const fn prefix(&self) -> &MountPrefix {
        &self.prefix
    }

    /// Returns the shared leak log.
    #[must_use]
    pub const fn leaks(&self) -> &LeakLog {
        &self.leaks
    }

    /// Releases one resource according to its persistence class.
    ///
    /// For external resources the returned future only observes the
    /// shielded release; dropping it does not cancel the release.
    pub async fn release(&self, resource: Arc<dyn OwnedResource>) -> ReleaseOutcome {
        match resource.persistence() {
            Persistence::Ephemeral => self.release_inline(resource.as_ref()).await,
            Persistence::External => {
                let label = resource.label().to_owned();
                let task = tokio::spawn(shielded_release(self.clone(), resource));
                match task.await {
                    Ok(outcome) => outcome,
                    Err(join_error) => {
                        let leak = self.leak(&label, format!("release task failed: {join_error}"));
                        ReleaseOutcome::Leaked(leak)
                    }
                }
            }
        }
    }

    /// Releases one resource without waiting for it.
    ///
    /// External resources get a detached shielded release, or a blocking
    /// release when no runtime is available. Ephemeral resources get a
    /// best-effort blocking release.
    pub fn release_detached(&self, resource: Arc<dyn OwnedResource>) {
        match resource.persistence() {
            Persistence::External => match Handle::try_current() {
                Ok(handle) => {
                    debug!(
                        prefix = %self.prefix,
                        resource = resource.label(),
                        "handing external resource to detached release"
                    );
                    drop(handle.spawn(shielded_release(self.clone(), resource)));
                }
                Err(_) => {
                    if let Err(err) = resource.release_blocking() {
                        self.leak(resource.label(), err.to_string());
                    }
                }
            },
            Persistence::Ephemeral => {
                if let Err(err) = resource.release_blocking() {
                    debug!(
                        prefix = %self.prefix,
                        resource = resource.label(),
                        error = %err,
                        "dropped ephemeral resource without release"
                    );
                }
            }
        }
    }

    async fn release_inline(&self, resource: &dyn OwnedResource) -> ReleaseOutcome {
        let attempt = tokio::time::timeout(self.release_timeout, resource.release()).await;
        match attempt {
            Ok(Ok(())) => {
                debug!(prefix = %self.prefix, resource = resource.label(), "released resource");
                ReleaseOutcome::Released
            }
            Ok(Err(err)) => {
                warn!(
                    prefix = %self.prefix,
                    resource = resource.label(),
                    error = %err,
                    "resource release failed"
                );
                ReleaseOutcome::Failed(err)
            }
            Err(_) => {
                warn!(
                    prefix = %self.prefix,
                    resource = resource.label(),
                    "resource release timed out"
                );
                ReleaseOutcome::Failed(ReleaseError::TimedOut {
                    resource: resource.label().to_owned(),
                    timeout_ms: duration_millis(self.release_timeout),
                })
            }
        }
    }

    fn leak(&self, resource: &str, reason: String) -> ResourceLeak {
        error!(
            prefix = %self.prefix,
            resource,
            reason = %reason,
            leak = true,
            "resource leak: release could not be confirmed"
        );
        let leak = ResourceLeak {
            prefix: self.prefix.clone(),
            resource: resource.to_owned(),
            reason,
        };
        self.leaks.record(leak.clone());
        leak
    }
}

/// Runs inside its own task so that cancelling the caller does not cancel
/// the release. Do not await this future directly.
async fn shielded_release(
    context: ReleaseContext,
    resource: Arc<dyn OwnedResource>,
) -> ReleaseOutcome {
    let attempt = tokio::time::timeout(context.release_timeout, resource.release()).await;
    let reason = match attempt {
        Ok(Ok(())) => {
            debug!(
                prefix = %context.prefix,
                resource = resource.label(),
                "released external resource"
            );
            return ReleaseOutcome::Released;
        }
        Ok(Err(err)) => err.to_string(),
        Err(_) => format!(
            "release timed out after {}ms",
            duration_millis(context.release_timeout)
        ),
    };

    warn!(
        prefix = %context.prefix,
        resource = resource.label(),
        reason = %reason,
        "external release did not complete; running blocking fallback"
    );

    let fallback_resource = Arc::clone(&resource);
    let fallback = tokio::task::spawn_blocking(move || fallback_resource.release_blocking()).await;
    match fallback {
        Ok(Ok(())) => {
            warn!(
                prefix = %context.prefix,
                resource = resource.label(),
                "external resource released by blocking fallback"
            );
            ReleaseOutcome::RecoveredByFallback
        }
        Ok(Err(err)) => ReleaseOutcome::Leaked(
            context.leak(resource.label(), format!("{reason}; fallback failed: {err}")),
        ),
        Err(join_error) => ReleaseOutcome::Leaked(context.leak(
            resource.label(),
            format!("{reason}; fallback task failed: {join_error}"),
        )),
    }
}

/// Ordered set of resources owned by one mount.
///
/// Dropping a scope that still holds resources hands them to
/// [`ReleaseContext::release_detached`] in reverse order.
pub struct ResourceScope {
    context: ReleaseContext,
    entries: Vec<Arc<dyn OwnedResource>>,
}

impl ResourceScope {
    /// Creates an empty scope.
    #[must_use]
    pub const fn new(context: ReleaseContext) -> Self {
        Self {
            context,
            entries: Vec::new(),
        }
    }

    /// Returns the owning mount's prefix.
    #[must_use]
    pub const fn prefix(&self) -> &MountPrefix {
        self.context.prefix()
    }

    /// Registers a newly acquired resource.
    pub fn register<R>(&mut self, resource: R)
    where
        R: OwnedResource + 'static,
    {
        self.register_shared(Arc::new(resource));
    }

    /// Registers a resource that is already shared.
    pub fn register_shared(&mut self, resource: Arc<dyn OwnedResource>) {
        debug!(
            prefix = %self.context.prefix,
            resource = resource.label(),
            persistence = %resource.persistence(),
            "registered resource"
        );
        self.entries.push(resource);
    }

    /// Number of resources awaiting release.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no resources await release.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns resource labels in registration order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.label().to_owned())
            .collect()
    }

    /// Removes the most recently registered resource.
    pub(crate) fn take_last(&mut self) -> Option<Arc<dyn OwnedResource>> {
        self.entries.pop()
    }

    /// Releases every resource in reverse registration order.
    ///
    /// Returns the failure messages in release order. If this future is
    /// dropped, resources not yet taken are released when the scope drops.
    pub async fn release_all(&mut self) -> Vec<String> {
        let mut failures = Vec::new();
        while let Some(resource) = self.entries.pop() {
            let outcome = self.context.release(resource).await;
            failures.extend(outcome.failure_message());
        }
        failures
    }

    fn release_remaining_detached(&mut self) {
        while let Some(resource) = self.entries.pop() {
            self.context.release_detached(resource);
        }
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            debug!(
                prefix = %self.context.prefix,
                remaining = self.entries.len(),
                "resource scope dropped with unreleased resources"
            );
        }
        self.release_remaining_detached();
    }
}

impl fmt::Debug for ResourceScope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.entries.iter().map(|entry| entry.label()).collect();
        formatter
            .debug_struct("ResourceScope")
            .field("context", &self.context)
            .field("entries", &labels)
            .finish()
    }
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
