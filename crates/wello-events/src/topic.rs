//! A single typed channel of the event bus.
//!
//! Every subscriber owns a bounded queue. Publishing clones the payload
//! into each queue in subscription order and waits at most
//! [`BusConfig::handoff_timeout`] per subscriber; a subscriber that cannot
//! keep up loses that message and nobody else is affected.
//!
//! Subscribers come in two shapes:
//!
//! - [`Topic::subscribe`] returns a [`Subscription`] that the consumer
//!   drains from its own task (the controller and I/O loops do this).
//! - [`Topic::subscribe_with`] runs a handler on a dedicated task. Errors
//!   returned by the handler and panics raised inside it are logged and
//!   counted, never propagated.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{BusError, HandlerError};

/// Default queue capacity per subscriber.
const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Default time a publisher waits for a full subscriber queue.
const DEFAULT_HANDOFF_TIMEOUT_MS: u64 = 100;

/// Delivery parameters shared by every channel of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Capacity of each subscriber queue.
    pub subscriber_capacity: usize,
    /// Longest time a publisher waits on one full subscriber queue.
    pub handoff_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            handoff_timeout: Duration::from_millis(DEFAULT_HANDOFF_TIMEOUT_MS),
        }
    }
}

/// Identifier of a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers whose queue accepted the payload.
    pub delivered: usize,
    /// Subscribers that could not accept it within the handoff timeout.
    pub dropped: usize,
}

/// Counters for one channel.
#[derive(Debug, Default)]
struct TopicMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    handler_faults: AtomicU64,
}

impl TopicMetrics {
    fn snapshot(&self, channel: &'static str, subscribers: usize) -> TopicMetricsSnapshot {
        TopicMetricsSnapshot {
            channel,
            subscribers,
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a channel's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetricsSnapshot {
    /// Channel name.
    pub channel: &'static str,
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Payloads published.
    pub published: u64,
    /// Payload copies accepted by subscriber queues.
    pub delivered: u64,
    /// Payload copies dropped on a full queue.
    pub dropped: u64,
    /// Handler errors and panics caught.
    pub handler_faults: u64,
}

struct SubscriberSlot<T> {
    id: SubscriptionId,
    name: String,
    tx: mpsc::Sender<T>,
}

/// Receiving end of a queue-style subscription.
///
/// Dropping it unregisters the subscriber on the next publish.
#[derive(Debug)]
pub struct Subscription<T> {
    id: SubscriptionId,
    channel: &'static str,
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Identifier of this subscription.
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Channel this subscription listens on.
    pub const fn channel(&self) -> &'static str {
        self.channel
    }

    /// Wait for the next payload. Returns `None` once the subscription
    /// has been removed from the channel and its queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next payload if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// A named channel with a fixed payload type.
pub struct Topic<T> {
    channel: &'static str,
    config: BusConfig,
    subscribers: RwLock<Vec<SubscriberSlot<T>>>,
    metrics: Arc<TopicMetrics>,
}

impl<T> core::fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Topic")
            .field("channel", &self.channel)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl<T> Topic<T> {
    /// Create an empty channel.
    pub fn new(channel: &'static str, config: BusConfig) -> Self {
        Self {
            channel,
            config,
            subscribers: RwLock::new(Vec::new()),
            metrics: Arc::new(TopicMetrics::default()),
        }
    }

    /// Channel name.
    pub const fn channel(&self) -> &'static str {
        self.channel
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Current counters of this channel.
    pub fn metrics(&self) -> TopicMetricsSnapshot {
        self.metrics.snapshot(self.channel, self.subscriber_count())
    }

    /// Register a subscriber whose queue the caller drains.
    pub fn subscribe(&self, name: &str) -> Subscription<T> {
        let (id, rx) = self.register(name);
        Subscription {
            id,
            channel: self.channel,
            rx,
        }
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|slot| slot.id != id);
        let removed = subscribers.len() != before;
        if removed {
            debug!(channel = self.channel, subscription = %id, "Subscriber removed");
        }
        removed
    }

    fn register(&self, name: &str) -> (SubscriptionId, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(self.config.subscriber_capacity.max(1));
        let id = SubscriptionId::new();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SubscriberSlot {
                id,
                name: name.to_owned(),
                tx,
            });
        debug!(
            channel = self.channel,
            subscriber = name,
            subscription = %id,
            "Subscriber registered"
        );
        (id, rx)
    }

    /// Clone the current subscriber senders so no lock is held while
    /// waiting on a queue.
    fn targets(&self) -> Vec<(SubscriptionId, String, mpsc::Sender<T>)> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|slot| (slot.id, slot.name.clone(), slot.tx.clone()))
            .collect()
    }

    fn prune(&self, closed: &[SubscriptionId]) {
        if closed.is_empty() {
            return;
        }
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|slot| !closed.contains(&slot.id));
        debug!(
            channel = self.channel,
            count = closed.len(),
            "Pruned closed subscribers"
        );
    }

    fn record(&self, report: PublishReport) {
        self.metrics.published.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .delivered
            .fetch_add(u64::try_from(report.delivered).unwrap_or(u64::MAX), Ordering::Relaxed);
        self.metrics
            .dropped
            .fetch_add(u64::try_from(report.dropped).unwrap_or(u64::MAX), Ordering::Relaxed);
    }
}

impl<T: Clone + Send + 'static> Topic<T> {
    /// Register a handler that runs on its own task.
    ///
    /// The handler sees payloads in publish order. Errors it returns and
    /// panics it raises are logged and counted; the handler keeps
    /// receiving subsequent payloads.
    pub fn subscribe_with<F>(&self, name: &str, handler: F) -> Result<SubscriptionId, BusError>
    where
        F: FnMut(&T) -> Result<(), HandlerError> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_err| BusError::NoRuntime {
            channel: self.channel,
        })?;
        let (id, rx) = self.register(name);
        runtime.spawn(drive_handler(
            self.channel,
            name.to_owned(),
            rx,
            handler,
            Arc::clone(&self.metrics),
        ));
        Ok(id)
    }

    /// Deliver `payload` to every subscriber, in subscription order.
    ///
    /// Waits at most the configured handoff timeout per subscriber.
    /// Subscribers whose receiving end is gone are unregistered.
    pub async fn publish(&self, payload: T) -> PublishReport {
        let mut report = PublishReport::default();
        let mut closed = Vec::new();

        for (id, name, tx) in self.targets() {
            match tx.send_timeout(payload.clone(), self.config.handoff_timeout).await {
                Ok(()) => report.delivered = report.delivered.saturating_add(1),
                Err(SendTimeoutError::Timeout(_)) => {
                    report.dropped = report.dropped.saturating_add(1);
                    warn!(
                        channel = self.channel,
                        subscriber = name,
                        timeout_ms = self.config.handoff_timeout.as_millis(),
                        "Subscriber queue full, payload dropped"
                    );
                }
                Err(SendTimeoutError::Closed(_)) => closed.push(id),
            }
        }

        self.prune(&closed);
        self.record(report);
        report
    }

    /// Deliver `payload` without waiting: full queues drop it.
    ///
    /// Usable from synchronous code.
    pub fn try_publish(&self, payload: &T) -> PublishReport {
        let mut report = PublishReport::default();
        let mut closed = Vec::new();

        for (id, name, tx) in self.targets() {
            match tx.try_send(payload.clone()) {
                Ok(()) => report.delivered = report.delivered.saturating_add(1),
                Err(TrySendError::Full(_)) => {
                    report.dropped = report.dropped.saturating_add(1);
                    warn!(
                        channel = self.channel,
                        subscriber = name,
                        "Subscriber queue full, payload dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        self.prune(&closed);
        self.record(report);
        report
    }
}

/// Run a handler subscriber until its queue is closed.
async fn drive_handler<T, F>(
    channel: &'static str,
    name: String,
    mut rx: mpsc::Receiver<T>,
    mut handler: F,
    metrics: Arc<TopicMetrics>,
) where
    F: FnMut(&T) -> Result<(), HandlerError>,
{
    while let Some(payload) = rx.recv().await {
        match catch_unwind(AssertUnwindSafe(|| handler(&payload))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics.handler_faults.fetch_add(1, Ordering::Relaxed);
                warn!(channel, subscriber = name, error = %e, "Subscriber handler failed");
            }
            Err(_panic) => {
                metrics.handler_faults.fetch_add(1, Ordering::Relaxed);
                error!(channel, subscriber = name, "Subscriber handler panicked");
            }
        }
    }
    debug!(channel, subscriber = name, "Subscriber handler stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::arithmetic_side_effects)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn topic(capacity: usize, handoff_ms: u64) -> Topic<u32> {
        Topic::new(
            "test",
            BusConfig {
                subscriber_capacity: capacity,
                handoff_timeout: Duration::from_millis(handoff_ms),
            },
        )
    }

    #[tokio::test]
    async fn every_subscriber_receives_every_payload() {
        let topic = topic(8, 50);
        let mut first = topic.subscribe("first");
        let mut second = topic.subscribe("second");

        let report = topic.publish(7).await;
        assert_eq!(report, PublishReport { delivered: 2, dropped: 0 });
        assert_eq!(first.recv().await, Some(7));
        assert_eq!(second.recv().await, Some(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn subscription_churn_during_publish_from_other_tasks() {
        let topic = Arc::new(topic(256, 50));
        let mut steady = topic.subscribe("steady");

        let publisher = tokio::spawn({
            let topic = Arc::clone(&topic);
            async move {
                let mut dropped = 0;
                for n in 0..200_u32 {
                    dropped += topic.publish(n).await.dropped;
                    tokio::task::yield_now().await;
                }
                dropped
            }
        });
        let churn = tokio::spawn({
            let topic = Arc::clone(&topic);
            async move {
                let mut removed = 0;
                for _ in 0..100 {
                    let sub = topic.subscribe("churn");
                    tokio::task::yield_now().await;
                    if topic.unsubscribe(sub.id()) {
                        removed += 1;
                    }
                }
                removed
            }
        });

        assert_eq!(publisher.await.unwrap(), 0);
        assert_eq!(churn.await.unwrap(), 100);

        let mut received = Vec::new();
        while let Some(n) = steady.try_recv() {
            received.push(n);
        }
        assert_eq!(received, (0..200).collect::<Vec<_>>());
        assert_eq!(topic.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn payloads_arrive_in_publish_order() {
        let topic = topic(8, 50);
        let mut sub = topic.subscribe("ordered");
        for value in 1..=5 {
            topic.publish(value).await;
        }
        let mut seen = Vec::new();
        while let Some(value) = sub.try_recv() {
            seen.push(value);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_are_isolated() {
        let topic = topic(8, 50);
        topic
            .subscribe_with("failing", |_| Err(HandlerError::new("boom")))
            .unwrap();
        topic
            .subscribe_with("panicking", |_| panic!("handler exploded"))
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        topic
            .subscribe_with("healthy", move |value| {
                sink.lock().unwrap().push(*value);
                Ok(())
            })
            .unwrap();

        let first = topic.publish(1).await;
        let second = topic.publish(2).await;
        assert_eq!(first.delivered, 3);
        assert_eq!(second.delivered, 3);

        for _ in 0..50 {
            if seen.lock().unwrap().len() == 2 && topic.metrics().handler_faults == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(topic.metrics().handler_faults, 4);
        assert_eq!(topic.subscriber_count(), 3);
    }

    #[tokio::test]
    async fn slow_subscriber_only_loses_its_own_copy() {
        let topic = topic(1, 10);
        let mut slow = topic.subscribe("slow");
        let mut fast = topic.subscribe("fast");

        assert_eq!(topic.publish(1).await.delivered, 2);
        assert_eq!(fast.recv().await, Some(1));

        let report = topic.publish(2).await;
        assert_eq!(report, PublishReport { delivered: 1, dropped: 1 });
        assert_eq!(fast.recv().await, Some(2));
        assert_eq!(slow.recv().await, Some(1));
        assert_eq!(slow.try_recv(), None);
        assert_eq!(topic.metrics().dropped, 1);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let topic = topic(4, 10);
        let kept = topic.subscribe("kept");
        drop(topic.subscribe("gone"));
        assert_eq!(topic.subscriber_count(), 2);

        let report = topic.publish(3).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(topic.subscriber_count(), 1);
        drop(kept);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let topic = topic(4, 10);
        let mut sub = topic.subscribe("leaving");
        assert!(topic.unsubscribe(sub.id()));
        assert!(!topic.unsubscribe(sub.id()));

        let report = topic.publish(9).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn try_publish_works_without_a_runtime() {
        let topic = topic(1, 10);
        let mut sub = topic.subscribe("sync");
        assert_eq!(topic.try_publish(&4).delivered, 1);
        assert_eq!(topic.try_publish(&5).dropped, 1);
        assert_eq!(sub.try_recv(), Some(4));
    }

    #[test]
    fn handler_subscription_needs_a_runtime() {
        let topic = topic(1, 10);
        let result = topic.subscribe_with("orphan", |_| Ok(()));
        assert!(matches!(result, Err(BusError::NoRuntime { channel: "test" })));
        assert_eq!(topic.subscriber_count(), 0);
    }
}
