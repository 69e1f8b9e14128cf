//! Change events fanned out to compositor subscribers.

use super::helpers::{config, drain, echo, entered, next_notification};
use async_trait::async_trait;
use mosaic::compositor::CompositorConfig;
use mosaic::compositor::adapters::memory::InProcessConnector;
use mosaic::compositor::domain::{ChangeEvent, MountChange, MountPrefix, Notification, ServerInfo};
use mosaic::compositor::ports::{ChangeNotifier, SessionError, SessionResult, ToolServer};
use mosaic::compositor::services::NotificationSubscription;
use rstest::rstest;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Waits for the next resource notification, skipping mount-set changes and
/// pinned-server announcements.
async fn next_from(subscription: &mut NotificationSubscription, prefix: &str) -> Notification {
    loop {
        let notification = next_notification(subscription)
            .await
            .expect("a notification should arrive");
        if matches!(notification, Notification::Resource { .. })
            && notification.prefix().as_str() == prefix
        {
            return notification;
        }
    }
}

fn resource_events_from(notifications: &[Notification], prefix: &str) -> usize {
    notifications
        .iter()
        .filter(|notification| {
            matches!(notification, Notification::Resource { .. })
                && notification.prefix().as_str() == prefix
        })
        .count()
}

/// Announces a list change the moment it is attached to a session.
struct EagerServer;

#[async_trait]
impl ToolServer for EagerServer {
    fn info(&self) -> ServerInfo {
        ServerInfo::new("eager", "1.0.0")
    }

    fn attach(&self, notifier: ChangeNotifier) {
        let _sent = notifier.notify(ChangeEvent::ResourceListChanged);
    }

    async fn call_tool(&self, name: &str, _payload: Value) -> SessionResult<Value> {
        Err(SessionError::UnknownOperation(name.to_owned()))
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn every_subscriber_sees_events_tagged_with_their_prefix(config: CompositorConfig) {
    let compositor = entered(config).await;
    let mut first = compositor.subscribe();
    let mut second = compositor.subscribe();
    let server = echo("docs");
    compositor
        .mount("docs", &InProcessConnector::new(Arc::clone(&server)))
        .await
        .expect("mount should succeed");

    assert!(server.emit(ChangeEvent::updated("file:///readme")));

    let expected = Notification::Resource {
        prefix: MountPrefix::new("docs").expect("valid prefix"),
        event: ChangeEvent::updated("file:///readme"),
    };
    assert_eq!(next_from(&mut first, "docs").await, expected);
    assert_eq!(next_from(&mut second, "docs").await, expected);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn mount_set_changes_are_announced_in_order(config: CompositorConfig) {
    let compositor = entered(config).await;
    let mut subscription = compositor.subscribe();

    compositor
        .mount("alpha", &InProcessConnector::new(echo("alpha")))
        .await
        .expect("mount");
    compositor.unmount("alpha").await.expect("unmount");

    let changes: Vec<(String, MountChange)> = drain(&mut subscription)
        .into_iter()
        .filter_map(|notification| match notification {
            Notification::MountSetChanged { prefix, change } => Some((prefix.into(), change)),
            Notification::Resource { .. } => None,
        })
        .collect();
    assert_eq!(
        changes,
        vec![
            ("alpha".to_owned(), MountChange::Mounted),
            ("alpha".to_owned(), MountChange::Unmounted),
        ]
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn mounted_is_announced_before_the_first_resource_event(config: CompositorConfig) {
    let compositor = entered(config).await;
    let mut subscription = compositor.subscribe();

    compositor
        .mount("eager", &InProcessConnector::new(Arc::new(EagerServer)))
        .await
        .expect("mount should succeed");

    let prefix = MountPrefix::new("eager").expect("valid prefix");
    let mut seen = Vec::new();
    while !seen
        .iter()
        .any(|notification| matches!(notification, Notification::Resource { .. }))
    {
        let notification = next_notification(&mut subscription)
            .await
            .expect("the attach-time event should arrive");
        if notification.prefix() == &prefix {
            seen.push(notification);
        }
    }
    assert_eq!(
        seen,
        vec![
            Notification::MountSetChanged {
                prefix: prefix.clone(),
                change: MountChange::Mounted,
            },
            Notification::Resource {
                prefix,
                event: ChangeEvent::ResourceListChanged,
            },
        ]
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn nothing_is_published_for_a_prefix_after_unmount(config: CompositorConfig) {
    let compositor = entered(config).await;
    let mut subscription = compositor.subscribe();
    let server = echo("docs");
    compositor
        .mount("docs", &InProcessConnector::new(Arc::clone(&server)))
        .await
        .expect("mount should succeed");
    assert!(server.emit(ChangeEvent::ResourceListChanged));
    next_from(&mut subscription, "docs").await;

    compositor.unmount("docs").await.expect("unmount");
    let _ = server.emit(ChangeEvent::updated("file:///late"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(resource_events_from(&drain(&mut subscription), "docs"), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn a_remounted_prefix_publishes_only_the_new_server_events(config: CompositorConfig) {
    let compositor = entered(config).await;
    let mut subscription = compositor.subscribe();
    let old = echo("old");
    compositor
        .mount("docs", &InProcessConnector::new(Arc::clone(&old)))
        .await
        .expect("first mount");
    compositor.unmount("docs").await.expect("unmount");
    let new = echo("new");
    compositor
        .mount("docs", &InProcessConnector::new(Arc::clone(&new)))
        .await
        .expect("second mount");

    let _ = old.emit(ChangeEvent::updated("file:///stale"));
    assert!(new.emit(ChangeEvent::updated("file:///fresh")));

    let received = next_from(&mut subscription, "docs").await;
    assert_eq!(
        received,
        Notification::Resource {
            prefix: MountPrefix::new("docs").expect("valid prefix"),
            event: ChangeEvent::updated("file:///fresh"),
        }
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(resource_events_from(&drain(&mut subscription), "docs"), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn subscriptions_end_when_the_compositor_exits(config: CompositorConfig) {
    let compositor = entered(config).await;
    let mut subscription = compositor.subscribe();

    compositor.exit().await.expect("exit");

    let mut remaining = 0_usize;
    while tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("subscription should end")
        .is_some()
    {
        remaining += 1;
    }
    assert!(remaining > 0, "exit announces the unmounted pinned servers");
}
