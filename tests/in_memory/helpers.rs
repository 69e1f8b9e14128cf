//! Shared helpers for compositor integration tests.

use mosaic::compositor::adapters::CleanupAction;
use mosaic::compositor::adapters::memory::EchoServer;
use mosaic::compositor::domain::Notification;
use mosaic::compositor::ports::ReleaseError;
use mosaic::compositor::services::NotificationSubscription;
use mosaic::compositor::{Compositor, CompositorConfig};
use mosaic::telemetry::init_tracing;
use rstest::fixture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Counts how often a cleanup actually ran, across both release paths.
#[derive(Debug, Clone, Default)]
pub struct ReleaseCounter {
    count: Arc<AtomicUsize>,
}

impl ReleaseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// External cleanup that bumps the counter once per release.
    pub fn cleanup(&self, label: &str) -> CleanupAction {
        self.cleanup_after(label, Duration::ZERO)
    }

    /// External cleanup whose asynchronous release takes `delay`.
    pub fn cleanup_after(&self, label: &str, delay: Duration) -> CleanupAction {
        let async_count = Arc::clone(&self.count);
        let blocking_count = Arc::clone(&self.count);
        CleanupAction::external(
            label,
            move || {
                let count = Arc::clone(&async_count);
                async move {
                    tokio::time::sleep(delay).await;
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), ReleaseError>(())
                }
            },
            move || {
                blocking_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
    }
}

/// Configuration with timeouts short enough for tests.
#[fixture]
pub fn config() -> CompositorConfig {
    CompositorConfig::default()
        .with_name("integration")
        .with_handshake_timeout(Duration::from_millis(500))
        .with_teardown_timeout(Duration::from_millis(500))
        .with_release_timeout(Duration::from_millis(200))
        .with_session_close_timeout(Duration::from_millis(200))
}

/// Builds and enters a compositor.
///
/// # Panics
///
/// Panics when the configuration is invalid or `enter` fails.
pub async fn entered(config: CompositorConfig) -> Compositor {
    init_tracing();
    let compositor = Compositor::new(config).expect("config should be valid");
    compositor.enter().await.expect("enter should succeed");
    compositor
}

pub fn echo(name: &str) -> Arc<EchoServer> {
    Arc::new(EchoServer::new(name))
}

/// Drains every notification already delivered to `subscription`.
pub fn drain(subscription: &mut NotificationSubscription) -> Vec<Notification> {
    std::iter::from_fn(|| subscription.try_recv()).collect()
}

/// Waits up to one second for the next notification.
pub async fn next_notification(
    subscription: &mut NotificationSubscription,
) -> Option<Notification> {
    tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .ok()
        .flatten()
}
