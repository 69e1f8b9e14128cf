//! Helper task owned by a mount.

use crate::compositor::ports::{OwnedResource, Persistence, ReleaseError, ReleaseResult};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinHandle;

/// A spawned helper task that is aborted when released.
#[derive(Debug)]
pub struct TaskResource {
    label: String,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskResource {
    /// Takes ownership of a spawned task.
    #[must_use]
    pub fn new(label: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            label: label.into(),
            handle: Mutex::new(Some(handle)),
        }
    }

    fn take(&self) -> Option<JoinHandle<()>> {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait]
impl OwnedResource for TaskResource {
    fn label(&self) -> &str {
        &self.label
    }

    fn persistence(&self) -> Persistence {
        Persistence::Ephemeral
    }

    async fn release(&self) -> ReleaseResult<()> {
        let Some(handle) = self.take() else {
            return Ok(());
        };
        handle.abort();
        match handle.await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(ReleaseError::failed(err)),
        }
    }

    fn release_blocking(&self) -> ReleaseResult<()> {
        if let Some(handle) = self.take() {
            handle.abort();
        }
        Ok(())
    }
}

impl Drop for TaskResource {
    fn drop(&mut self) {
        if let Some(handle) = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
