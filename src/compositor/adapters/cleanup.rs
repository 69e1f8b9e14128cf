//! Closure-backed owned resource.

use crate::compositor::ports::{OwnedResource, Persistence, ReleaseError, ReleaseResult};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;

type AsyncRelease = Box<dyn Fn() -> BoxFuture<'static, ReleaseResult<()>> + Send + Sync>;
type BlockingRelease = Box<dyn Fn() -> ReleaseResult<()> + Send + Sync>;

/// A resource released by running caller-supplied closures.
///
/// Useful for wrapping handles from other libraries, such as a container
/// client's stop call, without writing a dedicated type.
pub struct CleanupAction {
    label: String,
    persistence: Persistence,
    release: AsyncRelease,
    blocking: Option<BlockingRelease>,
}

impl CleanupAction {
    /// Creates an ephemeral cleanup from an async closure.
    #[must_use]
    pub fn ephemeral<F, Fut>(label: impl Into<String>, release: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReleaseResult<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            persistence: Persistence::Ephemeral,
            release: Box::new(move || release().boxed()),
            blocking: None,
        }
    }

    /// Creates an external cleanup from an async closure and a blocking
    /// fallback.
    #[must_use]
    pub fn external<F, Fut, B>(label: impl Into<String>, release: F, blocking: B) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReleaseResult<()>> + Send + 'static,
        B: Fn() -> ReleaseResult<()> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            persistence: Persistence::External,
            release: Box::new(move || release().boxed()),
            blocking: Some(Box::new(blocking)),
        }
    }
}

#[async_trait]
impl OwnedResource for CleanupAction {
    fn label(&self) -> &str {
        &self.label
    }

    fn persistence(&self) -> Persistence {
        self.persistence
    }

    async fn release(&self) -> ReleaseResult<()> {
        (self.release)().await
    }

    fn release_blocking(&self) -> ReleaseResult<()> {
        self.blocking.as_ref().map_or_else(
            || Err(ReleaseError::NoBlockingRelease(self.label.clone())),
            |blocking| blocking(),
        )
    }
}

impl fmt::Debug for CleanupAction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CleanupAction")
            .field("label", &self.label)
            .field("persistence", &self.persistence)
            .field("has_blocking_release", &self.blocking.is_some())
            .finish_non_exhaustive()
    }
}
