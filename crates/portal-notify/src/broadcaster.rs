use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use portal_types::events::NotificationEvent;

/// Per-subscriber queue depth. A subscriber that falls this far behind is evicted.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// Fans notification events out to every live subscriber.
///
/// Each subscriber owns a small bounded queue. Publishing never waits on a
/// subscriber: a full (or closed) queue gets its subscriber dropped from the
/// registry, which ends that subscriber's stream once it drains.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

struct BroadcasterInner {
    /// subscriber id -> queue sender
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<NotificationEvent>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl BroadcasterInner {
    fn registry(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<NotificationEvent>>> {
        // The map stays consistent even if a holder panicked.
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                subscribers: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a fresh subscriber. Events published before this call are not replayed.
    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        let mut subscribers = self.inner.registry();
        if self.inner.closed.load(Ordering::Acquire) {
            // Dropping the sender ends the stream right away.
            debug!("Subscriber {} refused, broadcaster closed", id);
        } else {
            subscribers.insert(id, tx);
            debug!("Subscriber {} registered", id);
        }
        drop(subscribers);

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Push an event to every registered subscriber. Returns how many accepted it.
    pub fn broadcast(&self, event: NotificationEvent) -> usize {
        let mut subscribers = self.inner.registry();
        let mut delivered = 0;

        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("Evicting slow subscriber {}", id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Subscriber {} went away", id);
                false
            }
        });

        info!("Broadcast notification {} to {} subscribers", event.id, delivered);
        delivered
    }

    /// Drop every subscriber and refuse new ones. Each open stream ends
    /// after delivering what is already queued.
    pub fn close(&self) {
        let mut subscribers = self.inner.registry();
        self.inner.closed.store(true, Ordering::Release);
        let count = subscribers.len();
        subscribers.clear();
        info!("Broadcaster closed, ended {} subscriber stream(s)", count);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().len()
    }

    pub fn is_subscribed(&self, id: Uuid) -> bool {
        self.inner.registry().contains_key(&id)
    }
}

/// A live event feed. Ends when its subscriber is evicted; unregisters on drop.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<NotificationEvent>,
    registry: Weak<BroadcasterInner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event. `None` once evicted and drained.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = NotificationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            if inner.registry().remove(&self.id).is_some() {
                debug!("Subscriber {} disconnected", self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn event(id: i64, message: &str) -> NotificationEvent {
        NotificationEvent {
            id,
            message: message.to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn early_subscriber_gets_exactly_one_event() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe();

        assert_eq!(broadcaster.broadcast(event(1, "doors open")), 1);

        let got = sub.recv().await.unwrap();
        assert_eq!(got.message, "doors open");
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_subscriber_sees_no_replay() {
        let broadcaster = Broadcaster::new();
        broadcaster.broadcast(event(1, "missed"));

        let mut late = broadcaster.subscribe();
        assert!(late.rx.try_recv().is_err());

        broadcaster.broadcast(event(2, "seen"));
        assert_eq!(late.next().await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn full_queue_evicts_subscriber() {
        let broadcaster = Broadcaster::with_capacity(2);
        let mut slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        broadcaster.broadcast(event(1, "a"));
        assert_eq!(fast.recv().await.unwrap().id, 1);
        broadcaster.broadcast(event(2, "b"));
        assert_eq!(fast.recv().await.unwrap().id, 2);

        // slow holds 1 and 2; the third overflows it
        assert_eq!(broadcaster.broadcast(event(3, "c")), 1);
        assert!(!broadcaster.is_subscribed(slow.id()));
        assert!(broadcaster.is_subscribed(fast.id()));

        assert_eq!(slow.recv().await.unwrap().id, 1);
        assert_eq!(slow.recv().await.unwrap().id, 2);
        assert!(slow.recv().await.is_none());

        broadcaster.broadcast(event(4, "d"));
        assert_eq!(fast.recv().await.unwrap().id, 3);
        assert_eq!(fast.recv().await.unwrap().id, 4);
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.subscribe();
        let other = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert!(broadcaster.is_subscribed(other.id()));
        assert_eq!(broadcaster.broadcast(event(1, "x")), 1);
    }

    #[tokio::test]
    async fn close_ends_open_and_future_streams() {
        let broadcaster = Broadcaster::new();
        let mut open = broadcaster.subscribe();
        broadcaster.broadcast(event(1, "last call"));

        broadcaster.close();
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(open.next().await.unwrap().id, 1);
        assert!(open.next().await.is_none());

        let mut late = broadcaster.subscribe();
        assert!(late.next().await.is_none());
        assert_eq!(broadcaster.broadcast(event(2, "nobody")), 0);
    }

    #[tokio::test]
    async fn subscriptions_outliving_broadcaster_end() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe();
        drop(broadcaster);
        assert!(sub.recv().await.is_none());
    }
}
