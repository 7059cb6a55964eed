//! Fan-out of update events to stream subscribers.
//!
//! Membership changes take the registry write lock. Publishing clones the
//! current subscriber list under a read lock and delivers outside it, so a
//! connect or disconnect never waits on delivery and vice versa. Each
//! subscriber owns a bounded FIFO queue; when it is full the configured
//! [`OverflowPolicy`] decides which event is lost, for that subscriber only.

use chrono::{DateTime, Utc};
use exchange_core::types::UpdateEvent;
use market_poller::EventPublisher;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// What to discard when a subscriber queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the queue as is and discard the incoming event.
    #[default]
    DropNewest,
    /// Discard the oldest queued event to make room.
    DropOldest,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drop_newest" | "newest" => Ok(OverflowPolicy::DropNewest),
            "drop_oldest" | "oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(format!("unknown overflow policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Queue was full; one event was discarded according to the policy.
    Dropped,
    /// Subscriber is closing and no longer accepts events.
    Closed,
}

/// Counts for one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Bounded queue owned by one subscriber.
pub struct SubscriberQueue {
    id: u64,
    connected_at: DateTime<Utc>,
    capacity: usize,
    policy: OverflowPolicy,
    events: Mutex<VecDeque<Arc<UpdateEvent>>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn new(id: u64, capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            capacity,
            policy,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, event: Arc<UpdateEvent>) -> DeliveryOutcome {
        if self.closed.load(Ordering::Acquire) {
            return DeliveryOutcome::Closed;
        }

        let outcome = {
            let mut events = self.events.lock();
            if events.len() < self.capacity {
                events.push_back(event);
                DeliveryOutcome::Delivered
            } else {
                if self.policy == OverflowPolicy::DropOldest {
                    events.pop_front();
                    events.push_back(event);
                }
                DeliveryOutcome::Dropped
            }
        };

        match outcome {
            DeliveryOutcome::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            _ => self.notify.notify_one(),
        }
        outcome
    }

    /// Wait for the next event. `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<Arc<UpdateEvent>> {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.events.lock().pop_front() {
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_recv(&self) -> Option<Arc<UpdateEvent>> {
        self.events.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Registry {
    subscribers: RwLock<HashMap<u64, Arc<SubscriberQueue>>>,
    next_id: AtomicU64,
    capacity: usize,
    policy: OverflowPolicy,
    shut_down: AtomicBool,
}

/// Subscriber registry. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Arc::new(Registry {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                policy,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Register a new subscriber. `None` after [`Broadcaster::close_all`].
    pub fn subscribe(&self) -> Option<Subscription> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return None;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(
            id,
            self.inner.capacity,
            self.inner.policy,
        ));
        let count = {
            let mut subscribers = self.inner.subscribers.write();
            subscribers.insert(id, queue.clone());
            subscribers.len()
        };
        info!(subscriber_id = id, subscribers = count, "Subscriber registered");

        Some(Subscription {
            queue,
            broadcaster: self.clone(),
        })
    }

    /// Remove a subscriber and wake its reader. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let (removed, count) = {
            let mut subscribers = self.inner.subscribers.write();
            let removed = subscribers.remove(&id);
            (removed, subscribers.len())
        };

        match removed {
            Some(queue) => {
                queue.close();
                info!(
                    subscriber_id = id,
                    subscribers = count,
                    dropped = queue.dropped(),
                    "Subscriber removed"
                );
                true
            }
            None => false,
        }
    }

    /// Deliver to every current subscriber without blocking.
    pub fn publish(&self, event: UpdateEvent) -> PublishReport {
        let snapshot: Vec<Arc<SubscriberQueue>> =
            self.inner.subscribers.read().values().cloned().collect();

        let event = Arc::new(event);
        let mut report = PublishReport::default();
        for subscriber in snapshot {
            match subscriber.push(event.clone()) {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::Dropped => {
                    report.dropped += 1;
                    debug!(
                        subscriber_id = subscriber.id,
                        market_id = %event.market_id,
                        policy = ?subscriber.policy,
                        "Subscriber queue full, event dropped"
                    );
                }
                DeliveryOutcome::Closed => {}
            }
        }
        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Refuse new subscribers and end every open stream.
    pub fn close_all(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let drained: Vec<Arc<SubscriberQueue>> = self
            .inner
            .subscribers
            .write()
            .drain()
            .map(|(_, queue)| queue)
            .collect();
        for queue in &drained {
            queue.close();
        }
        info!(closed = drained.len(), "Broadcaster closed");
    }
}

impl EventPublisher for Broadcaster {
    fn publish(&self, event: UpdateEvent) {
        Broadcaster::publish(self, event);
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
    broadcaster: Broadcaster,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.queue.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.queue.connected_at
    }

    pub async fn recv(&self) -> Option<Arc<UpdateEvent>> {
        self.queue.recv().await
    }

    pub fn try_recv(&self) -> Option<Arc<UpdateEvent>> {
        self.queue.try_recv()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.queue.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_core::types::MarketStatus;
    use std::time::Duration;

    fn event(market_id: &str, n: i64) -> UpdateEvent {
        UpdateEvent {
            market_id: market_id.to_string(),
            status: MarketStatus::Open,
            inplay: false,
            runners: Vec::new(),
            timestamp: DateTime::from_timestamp(n, 0).unwrap(),
            settlement: None,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers_in_order() {
        let broadcaster = Broadcaster::new(16, OverflowPolicy::DropNewest);
        let a = broadcaster.subscribe().unwrap();
        let b = broadcaster.subscribe().unwrap();

        for n in 0..3 {
            let report = broadcaster.publish(event("1.1", n));
            assert_eq!(report.delivered, 2);
        }

        for sub in [&a, &b] {
            for n in 0..3 {
                assert_eq!(sub.recv().await.unwrap().timestamp.timestamp(), n);
            }
            assert!(sub.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn test_full_queue_only_affects_that_subscriber() {
        let broadcaster = Broadcaster::new(2, OverflowPolicy::DropNewest);
        let stalled = broadcaster.subscribe().unwrap();
        let healthy = broadcaster.subscribe().unwrap();

        for n in 0..5 {
            broadcaster.publish(event("1.1", n));
            assert_eq!(healthy.recv().await.unwrap().timestamp.timestamp(), n);
        }

        assert_eq!(stalled.queued(), 2);
        assert_eq!(stalled.dropped(), 3);
        assert_eq!(healthy.dropped(), 0);
        // Oldest events survive under DropNewest.
        assert_eq!(stalled.try_recv().unwrap().timestamp.timestamp(), 0);
        assert_eq!(stalled.try_recv().unwrap().timestamp.timestamp(), 1);
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_latest_events() {
        let broadcaster = Broadcaster::new(2, OverflowPolicy::DropOldest);
        let sub = broadcaster.subscribe().unwrap();

        for n in 0..5 {
            broadcaster.publish(event("1.1", n));
        }
        assert_eq!(sub.dropped(), 3);
        assert_eq!(sub.try_recv().unwrap().timestamp.timestamp(), 3);
        assert_eq!(sub.try_recv().unwrap().timestamp.timestamp(), 4);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let broadcaster = Broadcaster::new(4, OverflowPolicy::DropNewest);
        let sub = broadcaster.subscribe().unwrap();
        let id = sub.id();
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert!(!broadcaster.unsubscribe(id));
        assert_eq!(broadcaster.publish(event("1.1", 0)).delivered, 0);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let broadcaster = Broadcaster::new(4, OverflowPolicy::DropNewest);
        let sub = broadcaster.subscribe().unwrap();

        let publisher = broadcaster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(event("1.9", 7));
        });

        let received = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.market_id, "1.9");
    }

    #[tokio::test]
    async fn test_close_all_ends_streams_and_refuses_new_subscribers() {
        let broadcaster = Broadcaster::new(4, OverflowPolicy::DropNewest);
        let sub = broadcaster.subscribe().unwrap();
        broadcaster.publish(event("1.1", 0));

        broadcaster.close_all();
        // Queued events drain before the end of stream.
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
        assert!(broadcaster.subscribe().is_none());
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_overflow_policy_parsing() {
        assert_eq!(
            "drop_oldest".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::DropOldest
        );
        assert_eq!(
            "Drop-Newest".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::DropNewest
        );
        assert!("fifo".parse::<OverflowPolicy>().is_err());
    }
}
