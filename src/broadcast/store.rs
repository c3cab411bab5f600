//! Broadcaster implementation
//!
//! The central registry that owns every subscriber's queue and fans each
//! published message out to all of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use crate::stats::{BroadcastSnapshot, BroadcastStats};

use super::config::BroadcasterConfig;
use super::error::BroadcastError;
use super::message::{EventMessage, SubscriberId};
use super::subscriber::{SubscriberHandle, SubscriberShared, SubscriberSlot, SubscriberState};

/// Why a subscriber left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Explicit unsubscribe
    Unsubscribed,
    /// Handle dropped or queue receiver gone
    Disconnected,
    /// No activity within the idle window
    IdleTimeout,
    /// Never activated within the handshake window
    HandshakeTimeout,
    /// Broadcaster shut down
    Shutdown,
}

impl RemovalReason {
    fn is_timeout(&self) -> bool {
        matches!(self, RemovalReason::IdleTimeout | RemovalReason::HandshakeTimeout)
    }
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RemovalReason::Unsubscribed => "unsubscribed",
            RemovalReason::Disconnected => "disconnected",
            RemovalReason::IdleTimeout => "idle timeout",
            RemovalReason::HandshakeTimeout => "handshake timeout",
            RemovalReason::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

/// Result of a single publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Subscribers the message was enqueued for
    pub delivered: usize,
    /// Subscribers whose queue was full
    pub dropped: usize,
}

/// Registry of live subscribers
///
/// One `RwLock` guards membership. `publish` holds the read lock while it
/// enqueues with `try_send`, so it never waits on a consumer and is atomic
/// with respect to `subscribe`/`unsubscribe`, which take the write lock.
/// The lock is never held across an `.await`.
pub struct Broadcaster {
    /// Map of subscriber id to its queue and shared state
    subscribers: RwLock<HashMap<SubscriberId, SubscriberSlot>>,

    /// Set once by `shutdown`; read under the lock
    shut_down: AtomicBool,

    next_id: AtomicU64,

    stats: BroadcastStats,

    /// Configuration
    config: BroadcasterConfig,
}

impl Broadcaster {
    /// Create a new broadcaster with default configuration
    pub fn new() -> Self {
        Self::with_config(BroadcasterConfig::default())
    }

    /// Create a new broadcaster with custom configuration
    pub fn with_config(config: BroadcasterConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            stats: BroadcastStats::new(),
            config,
        }
    }

    /// Get the broadcaster configuration
    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    /// Register a new subscriber
    ///
    /// The subscriber starts `Pending` and already receives every message
    /// published after this call returns.
    pub fn subscribe(self: &Arc<Self>) -> Result<SubscriberHandle, BroadcastError> {
        let mut subscribers = self.subscribers.write();

        if self.shut_down.load(Ordering::Acquire) {
            return Err(BroadcastError::ShutDown);
        }

        let limit = self.config.max_subscribers;
        if limit > 0 && subscribers.len() >= limit {
            tracing::warn!(limit = limit, "Subscriber rejected: limit reached");
            return Err(BroadcastError::TooManySubscribers(limit));
        }

        let id = SubscriberId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let shared = Arc::new(SubscriberShared::new(id));

        subscribers.insert(
            id,
            SubscriberSlot {
                tx,
                shared: Arc::clone(&shared),
            },
        );
        let count = subscribers.len();
        drop(subscribers);

        self.stats.record_added();
        tracing::debug!(subscriber = %id, subscribers = count, "Subscriber added");

        Ok(SubscriberHandle::new(shared, rx, Arc::clone(self)))
    }

    /// Fan a message out to every registered subscriber
    ///
    /// Never blocks on a consumer: a full queue drops the message for that
    /// subscriber only. Subscribers whose receiver is gone are marked
    /// closing and retired by the next cleanup sweep.
    pub fn publish(&self, message: EventMessage) -> PublishOutcome {
        let subscribers = self.subscribers.read();
        let mut outcome = PublishOutcome::default();

        if self.shut_down.load(Ordering::Acquire) {
            return outcome;
        }

        for slot in subscribers.values() {
            if !slot.shared.state().accepts_delivery() {
                continue;
            }

            match slot.tx.try_send(message.clone()) {
                Ok(()) => {
                    slot.shared.record_delivered();
                    outcome.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    slot.shared.record_dropped();
                    outcome.dropped += 1;
                    tracing::trace!(subscriber = %slot.shared.id(), "Queue full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    slot.shared.begin_close();
                }
            }
        }
        drop(subscribers);

        self.stats.record_publish(outcome.delivered, outcome.dropped);
        outcome
    }

    /// Remove a subscriber
    ///
    /// Idempotent: unknown or already-removed ids are ignored. Returns
    /// whether a subscriber was actually removed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.remove(id, RemovalReason::Unsubscribed)
    }

    pub(super) fn remove(&self, id: SubscriberId, reason: RemovalReason) -> bool {
        let slot = self.subscribers.write().remove(&id);

        match slot {
            Some(slot) => {
                self.retire(slot, reason);
                true
            }
            None => false,
        }
    }

    fn retire(&self, slot: SubscriberSlot, reason: RemovalReason) {
        let SubscriberSlot { tx, shared } = slot;

        shared.begin_close();
        drop(tx);
        shared.mark_closed();

        self.stats.record_removed(reason.is_timeout());
        tracing::debug!(
            subscriber = %shared.id(),
            reason = %reason,
            delivered = shared.stats().delivered,
            dropped = shared.stats().dropped,
            "Subscriber removed"
        );
    }

    /// Check whether a subscriber is registered
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    /// Lifecycle state of a registered subscriber
    pub fn subscriber_state(&self, id: SubscriberId) -> Option<SubscriberState> {
        self.subscribers.read().get(&id).map(|slot| slot.shared.state())
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Get broadcaster statistics
    pub fn stats(&self) -> BroadcastSnapshot {
        self.stats.snapshot(self.subscriber_count())
    }

    /// Run cleanup once
    ///
    /// Removes subscribers that have:
    /// - Stayed pending longer than `handshake_timeout`
    /// - Been active without activity longer than `idle_timeout`
    /// - Been marked closing by a failed delivery
    ///
    /// Returns the number of subscribers removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut subscribers = self.subscribers.write();

        let expired: Vec<(SubscriberId, RemovalReason)> = subscribers
            .iter()
            .filter_map(|(id, slot)| {
                let shared = &slot.shared;
                let reason = match shared.state() {
                    SubscriberState::Pending => {
                        (now.saturating_duration_since(shared.created_at())
                            >= self.config.handshake_timeout)
                            .then_some(RemovalReason::HandshakeTimeout)
                    }
                    SubscriberState::Active => {
                        (now.saturating_duration_since(shared.last_activity())
                            >= self.config.idle_timeout)
                            .then_some(RemovalReason::IdleTimeout)
                    }
                    SubscriberState::Closing | SubscriberState::Closed => {
                        Some(RemovalReason::Disconnected)
                    }
                };
                reason.map(|reason| (*id, reason))
            })
            .collect();

        let removed: Vec<(SubscriberSlot, RemovalReason)> = expired
            .into_iter()
            .filter_map(|(id, reason)| subscribers.remove(&id).map(|slot| (slot, reason)))
            .collect();
        drop(subscribers);

        let count = removed.len();
        for (slot, reason) in removed {
            self.retire(slot, reason);
        }
        count
    }

    /// Spawn background cleanup task
    ///
    /// The task holds only a weak reference and exits once the broadcaster
    /// is dropped or shut down. Returns a handle that can be used to abort it.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let broadcaster = Arc::downgrade(self);
        let interval = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(broadcaster) = broadcaster.upgrade() else {
                    break;
                };
                if broadcaster.is_shut_down() {
                    break;
                }
                let removed = broadcaster.cleanup();
                if removed > 0 {
                    tracing::debug!(removed = removed, "Cleanup removed subscribers");
                }
            }
        })
    }

    /// Close every subscriber and refuse new ones
    ///
    /// Every subscriber's queue is released, which ends its stream. Later
    /// `publish` calls are no-ops. Returns the number of subscribers closed.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<SubscriberSlot> = {
            let mut subscribers = self.subscribers.write();
            self.shut_down.store(true, Ordering::Release);
            subscribers.drain().map(|(_, slot)| slot).collect()
        };

        let count = drained.len();
        for slot in drained {
            self.retire(slot, RemovalReason::Shutdown);
        }
        tracing::info!(closed = count, "Broadcaster shut down");
        count
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn msg(text: &'static str) -> EventMessage {
        EventMessage::from_static(text.as_bytes())
    }

    #[tokio::test]
    async fn test_subscribe_publish_receive() {
        let broadcaster = Arc::new(Broadcaster::new());

        let mut handle = assert_ok!(broadcaster.subscribe());
        assert_eq!(handle.state(), SubscriberState::Pending);
        assert!(handle.activate());

        let outcome = broadcaster.publish(msg("evt-1"));
        assert_eq!(outcome, PublishOutcome { delivered: 1, dropped: 0 });

        let received = handle.recv().await.unwrap();
        assert_eq!(received.as_bytes(), b"evt-1");
        assert_eq!(handle.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_pending_subscriber_receives() {
        let broadcaster = Arc::new(Broadcaster::new());
        let mut handle = broadcaster.subscribe().unwrap();

        broadcaster.publish(msg("early"));
        handle.activate();

        assert_eq!(handle.recv().await.unwrap().as_bytes(), b"early");
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let broadcaster = Arc::new(Broadcaster::new());
        let mut a = broadcaster.subscribe().unwrap();
        let mut b = broadcaster.subscribe().unwrap();
        a.activate();
        b.activate();

        for i in 0..20u8 {
            broadcaster.publish(EventMessage::from(vec![i]));
        }

        for handle in [&mut a, &mut b] {
            for i in 0..20u8 {
                assert_eq!(handle.recv().await.unwrap().as_bytes(), &[i]);
            }
        }
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscriber() {
        let broadcaster = Arc::new(Broadcaster::new());
        let mut early = broadcaster.subscribe().unwrap();
        early.activate();

        broadcaster.publish(msg("before"));

        let mut late = broadcaster.subscribe().unwrap();
        late.activate();
        broadcaster.publish(msg("after"));

        assert_eq!(late.recv().await.unwrap().as_bytes(), b"after");
        assert!(late.try_recv().is_none());
        assert_eq!(early.recv().await.unwrap().as_bytes(), b"before");
        assert_eq!(early.recv().await.unwrap().as_bytes(), b"after");
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let broadcaster = Arc::new(Broadcaster::new());
        let mut handle = broadcaster.subscribe().unwrap();
        let other = broadcaster.subscribe().unwrap();
        let id = handle.id();

        assert!(broadcaster.unsubscribe(id));
        assert!(!broadcaster.unsubscribe(id));
        handle.unsubscribe();
        handle.unsubscribe();

        assert!(!broadcaster.unsubscribe(SubscriberId::new(9999)));

        assert_eq!(handle.state(), SubscriberState::Closed);
        assert!(handle.recv().await.is_none());
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert!(broadcaster.contains(other.id()));

        let outcome = broadcaster.publish(msg("still works"));
        assert_eq!(outcome.delivered, 1);
    }

    #[tokio::test]
    async fn test_drop_handle_unsubscribes() {
        let broadcaster = Arc::new(Broadcaster::new());
        let handle = broadcaster.subscribe().unwrap();
        let id = handle.id();

        drop(handle);

        assert!(!broadcaster.contains(id));
        assert_eq!(broadcaster.publish(msg("x")).delivered, 0);
        assert_eq!(broadcaster.stats().subscribers_removed, 1);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_bounded() {
        let config = BroadcasterConfig::default().queue_capacity(4);
        let broadcaster = Arc::new(Broadcaster::with_config(config));
        let mut slow = broadcaster.subscribe().unwrap();
        let mut fast = broadcaster.subscribe().unwrap();
        slow.activate();
        fast.activate();

        let mut fast_seen = 0;
        for i in 0..100u8 {
            let outcome = broadcaster.publish(EventMessage::from(vec![i]));
            assert!(outcome.delivered >= 1);
            while fast.try_recv().is_some() {
                fast_seen += 1;
            }
        }

        assert_eq!(fast_seen, 100);

        let mut queued = Vec::new();
        while let Some(m) = slow.try_recv() {
            queued.push(m.as_bytes()[0]);
        }
        assert_eq!(queued, vec![0, 1, 2, 3]);

        let stats = slow.stats();
        assert_eq!(stats.delivered, 4);
        assert_eq!(stats.dropped, 96);
        assert_eq!(broadcaster.stats().dropped, 96);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.publish(msg("nobody")), PublishOutcome::default());
        assert_eq!(broadcaster.stats().published, 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_cleanup() {
        tokio::time::pause();

        let config = BroadcasterConfig::default().idle_timeout(Duration::from_secs(60));
        let broadcaster = Arc::new(Broadcaster::with_config(config));
        let handle = broadcaster.subscribe().unwrap();
        handle.activate();
        let id = handle.id();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(broadcaster.cleanup(), 0);
        assert!(broadcaster.contains(id));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(broadcaster.cleanup(), 1);
        assert!(!broadcaster.contains(id));
        assert_eq!(handle.state(), SubscriberState::Closed);

        assert_eq!(broadcaster.publish(msg("late")).delivered, 0);
        assert_eq!(broadcaster.stats().subscribers_timed_out, 1);
    }

    #[tokio::test]
    async fn test_activity_resets_idle_window() {
        tokio::time::pause();

        let config = BroadcasterConfig::default().idle_timeout(Duration::from_secs(10));
        let broadcaster = Arc::new(Broadcaster::with_config(config));
        let handle = broadcaster.subscribe().unwrap();
        handle.activate();

        tokio::time::advance(Duration::from_secs(8)).await;
        handle.touch();
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(broadcaster.cleanup(), 0);
        assert!(broadcaster.contains(handle.id()));
    }

    #[tokio::test]
    async fn test_recv_idle_timeout_removes_subscriber() {
        tokio::time::pause();

        let config = BroadcasterConfig::default().idle_timeout(Duration::from_secs(60));
        let broadcaster = Arc::new(Broadcaster::with_config(config));
        let mut handle = broadcaster.subscribe().unwrap();
        handle.activate();
        let id = handle.id();

        // Paused clock auto-advances to the deadline while recv waits.
        assert!(handle.recv().await.is_none());
        assert!(!broadcaster.contains(id));
        assert_eq!(handle.state(), SubscriberState::Closed);
        assert_eq!(broadcaster.stats().subscribers_timed_out, 1);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        tokio::time::pause();

        let config = BroadcasterConfig::default().handshake_timeout(Duration::from_secs(1));
        let broadcaster = Arc::new(Broadcaster::with_config(config));
        let stalled = broadcaster.subscribe().unwrap();
        let started = broadcaster.subscribe().unwrap();
        started.activate();

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(broadcaster.cleanup(), 1);

        assert!(!broadcaster.contains(stalled.id()));
        assert!(broadcaster.contains(started.id()));
        assert!(!stalled.activate());
    }

    #[tokio::test]
    async fn test_cleanup_task_runs() {
        tokio::time::pause();

        let config = BroadcasterConfig::default()
            .handshake_timeout(Duration::from_millis(500))
            .cleanup_interval(Duration::from_millis(100));
        let broadcaster = Arc::new(Broadcaster::with_config(config));
        let task = broadcaster.spawn_cleanup_task();

        let mut handle = broadcaster.subscribe().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(broadcaster.subscriber_count(), 0);
        assert!(handle.recv().await.is_none());
        task.abort();
    }

    #[tokio::test]
    async fn test_closed_receiver_marked_closing() {
        let broadcaster = Arc::new(Broadcaster::new());
        let mut handle = broadcaster.subscribe().unwrap();
        handle.activate();
        let id = handle.id();

        // Close the receiving half while the slot stays registered.
        handle.rx_close_for_test();
        broadcaster.publish(msg("x"));

        assert_eq!(broadcaster.subscriber_state(id), Some(SubscriberState::Closing));
        assert_eq!(broadcaster.cleanup(), 1);
        assert!(!broadcaster.contains(id));
    }

    #[tokio::test]
    async fn test_max_subscribers() {
        let config = BroadcasterConfig::default().max_subscribers(2);
        let broadcaster = Arc::new(Broadcaster::with_config(config));

        let _a = broadcaster.subscribe().unwrap();
        let b = broadcaster.subscribe().unwrap();
        let err = assert_err!(broadcaster.subscribe());
        assert_eq!(err, BroadcastError::TooManySubscribers(2));

        drop(b);
        assert_ok!(broadcaster.subscribe());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everyone() {
        let broadcaster = Arc::new(Broadcaster::new());
        let mut a = broadcaster.subscribe().unwrap();
        let mut b = broadcaster.subscribe().unwrap();
        a.activate();

        assert_eq!(broadcaster.shutdown(), 2);

        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        assert_eq!(a.state(), SubscriberState::Closed);
        assert_eq!(broadcaster.publish(msg("gone")), PublishOutcome::default());
        assert_eq!(assert_err!(broadcaster.subscribe()), BroadcastError::ShutDown);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_and_publish() {
        let broadcaster = Arc::new(Broadcaster::new());

        let mut registrations = Vec::new();
        for _ in 0..100 {
            let broadcaster = Arc::clone(&broadcaster);
            registrations.push(tokio::spawn(async move { broadcaster.subscribe().unwrap() }));
        }

        let mut handles = Vec::new();
        for registration in registrations {
            handles.push(registration.await.unwrap());
        }

        let publisher = {
            let broadcaster = Arc::clone(&broadcaster);
            tokio::spawn(async move {
                for i in 0..50u8 {
                    broadcaster.publish(EventMessage::from(vec![i]));
                }
            })
        };

        let readers: Vec<_> = handles
            .into_iter()
            .map(|mut handle| {
                tokio::spawn(async move {
                    handle.activate();
                    let mut seen = Vec::new();
                    while seen.len() < 50 {
                        match handle.recv().await {
                            Some(m) => seen.push(m.as_bytes()[0]),
                            None => break,
                        }
                    }
                    seen
                })
            })
            .collect();

        publisher.await.unwrap();

        let expected: Vec<u8> = (0..50).collect();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), expected);
        }
    }
}
