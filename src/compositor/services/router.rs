//! Fan-out of child change events to compositor subscribers.

use crate::compositor::domain::{ChangeEvent, MountId, MountPrefix, Notification};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

struct Feed {
    mount_id: MountId,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct RouterState {
    subscribers: Vec<mpsc::UnboundedSender<Notification>>,
    feeds: HashMap<MountPrefix, Feed>,
    closed: bool,
}

impl RouterState {
    fn broadcast(&mut self, notification: &Notification) {
        self.subscribers
            .retain(|subscriber| subscriber.send(notification.clone()).is_ok());
    }

    fn is_current(&self, prefix: &MountPrefix, mount_id: MountId) -> bool {
        self.feeds
            .get(prefix)
            .is_some_and(|feed| feed.mount_id == mount_id)
    }
}

impl Drop for RouterState {
    fn drop(&mut self) {
        for feed in self.feeds.values() {
            feed.task.abort();
        }
    }
}

/// Re-publishes child change events, tagged with their mount prefix, to
/// every compositor subscriber.
///
/// Each attached mount gets one forwarder task. Forwarders publish under
/// the same lock that [`NotificationRouter::detach`] takes, after checking
/// that their mount is still the one attached under the prefix, so nothing
/// from a detached mount is published once `detach` returns.
#[derive(Clone, Default)]
pub struct NotificationRouter {
    shared: Arc<Mutex<RouterState>>,
}

impl NotificationRouter {
    /// Creates a router with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts forwarding `events` for the mount `mount_id` under `prefix`.
    ///
    /// A feed already attached under the prefix is replaced and its task
    /// aborted.
    pub fn attach(
        &self,
        prefix: MountPrefix,
        mount_id: MountId,
        events: BoxStream<'static, ChangeEvent>,
    ) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        let task = tokio::spawn(forward(
            Arc::downgrade(&self.shared),
            prefix.clone(),
            mount_id,
            events,
        ));
        debug!(prefix = %prefix, mount_id = %mount_id, "attached notification feed");
        if let Some(previous) = state.feeds.insert(prefix, Feed { mount_id, task }) {
            previous.task.abort();
        }
    }

    /// Stops forwarding for `mount_id` under `prefix`.
    ///
    /// Returns `false` when no matching feed was attached.
    pub fn detach(&self, prefix: &MountPrefix, mount_id: MountId) -> bool {
        let mut state = self.lock();
        if !state.is_current(prefix, mount_id) {
            return false;
        }
        state.feeds.remove(prefix).is_some_and(|feed| {
            feed.task.abort();
            debug!(prefix = %prefix, mount_id = %mount_id, "detached notification feed");
            true
        })
    }

    /// Delivers a notification to every subscriber.
    pub fn publish(&self, notification: &Notification) {
        let mut state = self.lock();
        if !state.closed {
            state.broadcast(notification);
        }
    }

    /// Adds a subscriber.
    ///
    /// A subscription taken after [`NotificationRouter::close`] ends
    /// immediately.
    #[must_use]
    pub fn subscribe(&self) -> NotificationSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if !state.closed {
            state.subscribers.push(sender);
        }
        NotificationSubscription { receiver }
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|subscriber| !subscriber.is_closed());
        state.subscribers.len()
    }

    /// Returns the number of attached feeds.
    #[must_use]
    pub fn feed_count(&self) -> usize {
        self.lock().feeds.len()
    }

    /// Aborts every feed and ends every subscription.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
        for (_, feed) in state.feeds.drain() {
            feed.task.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn forward(
    shared: Weak<Mutex<RouterState>>,
    prefix: MountPrefix,
    mount_id: MountId,
    mut events: BoxStream<'static, ChangeEvent>,
) {
    while let Some(event) = events.next().await {
        let Some(router) = shared.upgrade() else {
            break;
        };
        let published = {
            let mut state = router.lock().unwrap_or_else(PoisonError::into_inner);
            let current = state.is_current(&prefix, mount_id);
            if current {
                state.broadcast(&Notification::Resource {
                    prefix: prefix.clone(),
                    event,
                });
            }
            current
        };
        if !published {
            break;
        }
    }
    debug!(prefix = %prefix, mount_id = %mount_id, "notification feed ended");
}

/// Receiving end of a compositor subscription.
#[derive(Debug)]
pub struct NotificationSubscription {
    receiver: mpsc::UnboundedReceiver<Notification>,
}

impl NotificationSubscription {
    /// Waits for the next notification; `None` once the compositor closed.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    /// Returns an already delivered notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for NotificationSubscription {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
