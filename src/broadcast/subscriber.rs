//! Subscriber state and handle types
//!
//! This module defines the per-subscriber state stored in the registry and
//! the handle given to the connection that consumes the stream.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::stats::SubscriberStats;

use super::message::{EventMessage, SubscriberId};
use super::store::{Broadcaster, RemovalReason};

/// Lifecycle state of a subscriber
///
/// Transitions only move forward: `Pending -> Active -> Closing -> Closed`,
/// with `Pending -> Closing` allowed for connections that never start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriberState {
    /// Registered, stream not yet confirmed writable
    Pending = 0,
    /// Receiving fan-out
    Active = 1,
    /// Disconnect detected, deliveries are discarded
    Closing = 2,
    /// Removed from the registry, resources released
    Closed = 3,
}

impl SubscriberState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SubscriberState::Pending,
            1 => SubscriberState::Active,
            2 => SubscriberState::Closing,
            _ => SubscriberState::Closed,
        }
    }

    /// Whether publish should enqueue for a subscriber in this state
    pub fn accepts_delivery(&self) -> bool {
        matches!(self, SubscriberState::Pending | SubscriberState::Active)
    }
}

/// State shared between the registry slot and the handle
#[derive(Debug)]
pub(super) struct SubscriberShared {
    id: SubscriberId,
    state: AtomicU8,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl SubscriberShared {
    pub(super) fn new(id: SubscriberId) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: AtomicU8::new(SubscriberState::Pending as u8),
            created_at: now,
            last_activity: Mutex::new(now),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub(super) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(super) fn state(&self) -> SubscriberState {
        SubscriberState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(super) fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(super) fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub(super) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Pending -> Active. Returns false if the subscriber was not pending.
    pub(super) fn activate(&self) -> bool {
        let switched = self
            .state
            .compare_exchange(
                SubscriberState::Pending as u8,
                SubscriberState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if switched {
            self.touch();
        }
        switched
    }

    /// Pending/Active -> Closing. Returns false if already closing or closed.
    pub(super) fn begin_close(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                SubscriberState::from_u8(current)
                    .accepts_delivery()
                    .then_some(SubscriberState::Closing as u8)
            })
            .is_ok()
    }

    pub(super) fn mark_closed(&self) {
        self.state.store(SubscriberState::Closed as u8, Ordering::Release);
    }

    pub(super) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn stats(&self) -> SubscriberStats {
        SubscriberStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            connected_for: self.created_at.elapsed(),
        }
    }
}

/// Registry entry for a single subscriber
pub(super) struct SubscriberSlot {
    /// Bounded outbound queue; dropping it ends the subscriber's stream
    pub(super) tx: mpsc::Sender<EventMessage>,
    pub(super) shared: Arc<SubscriberShared>,
}

/// Handle owned by the connection consuming a subscription
///
/// Reading drains the subscriber's bounded queue in publish order. Dropping
/// the handle unsubscribes, so a closed client connection releases its slot
/// without any extra bookkeeping by the caller.
pub struct SubscriberHandle {
    shared: Arc<SubscriberShared>,
    rx: mpsc::Receiver<EventMessage>,
    broadcaster: Arc<Broadcaster>,
    idle_timeout: Duration,
    handshake_timeout: Duration,
}

impl SubscriberHandle {
    pub(super) fn new(
        shared: Arc<SubscriberShared>,
        rx: mpsc::Receiver<EventMessage>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let idle_timeout = broadcaster.config().idle_timeout;
        let handshake_timeout = broadcaster.config().handshake_timeout;

        Self {
            shared,
            rx,
            broadcaster,
            idle_timeout,
            handshake_timeout,
        }
    }

    /// Subscriber identity
    pub fn id(&self) -> SubscriberId {
        self.shared.id()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SubscriberState {
        self.shared.state()
    }

    /// Confirm the output stream is writable (pending -> active)
    ///
    /// Returns false if the subscriber was not pending, e.g. because the
    /// handshake timeout already retired it.
    pub fn activate(&self) -> bool {
        let activated = self.shared.activate();
        if activated {
            tracing::debug!(subscriber = %self.id(), "Subscriber active");
        }
        activated
    }

    /// Record client-side activity, resetting the idle window
    pub fn touch(&self) {
        self.shared.touch();
    }

    /// Per-subscriber counters
    pub fn stats(&self) -> SubscriberStats {
        self.shared.stats()
    }

    /// Receive the next message
    ///
    /// Returns `None` once the subscriber is closing or closed, when the
    /// broadcaster retires it, or when no message arrives before the idle
    /// (or, while still pending, the handshake) deadline. A timed-out
    /// subscriber is removed from the registry before this returns.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        if !self.state().accepts_delivery() {
            self.discard();
            return None;
        }

        let (deadline, reason) = match self.state() {
            SubscriberState::Pending => (
                deadline_after(self.shared.created_at(), self.handshake_timeout),
                RemovalReason::HandshakeTimeout,
            ),
            _ => (
                deadline_after(self.shared.last_activity(), self.idle_timeout),
                RemovalReason::IdleTimeout,
            ),
        };

        match tokio::time::timeout_at(deadline, self.rx.recv()).await {
            Ok(Some(msg)) if self.state().accepts_delivery() => {
                self.shared.touch();
                Some(msg)
            }
            Ok(Some(_)) => {
                self.discard();
                None
            }
            Ok(None) => {
                self.shared.mark_closed();
                None
            }
            Err(_) => {
                self.broadcaster.remove(self.id(), reason);
                self.discard();
                None
            }
        }
    }

    /// Receive a message if one is queued, without waiting
    pub fn try_recv(&mut self) -> Option<EventMessage> {
        if !self.state().accepts_delivery() {
            self.discard();
            return None;
        }

        let msg = self.rx.try_recv().ok()?;
        self.shared.touch();
        Some(msg)
    }

    /// Unsubscribe; calling it again is a no-op
    pub fn unsubscribe(&mut self) {
        self.broadcaster.unsubscribe(self.id());
        self.discard();
    }

    fn discard(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    #[cfg(test)]
    pub(super) fn rx_close_for_test(&mut self) {
        self.rx.close();
    }
}

/// `start + window`, saturating far in the future instead of overflowing
fn deadline_after(start: Instant, window: Duration) -> Instant {
    start
        .checked_add(window)
        .unwrap_or_else(|| start + Duration::from_secs(60 * 60 * 24 * 365))
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.broadcaster.remove(self.shared.id(), RemovalReason::Disconnected);
    }
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("id", &self.shared.id())
            .field("state", &self.shared.state())
            .finish()
    }
}
