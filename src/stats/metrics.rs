//! Statistics and metrics for the relay
//!
//! Live counters are plain atomics updated on the hot path with relaxed
//! ordering. Readers take a snapshot, which is an ordinary `Clone` struct.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live ingestion counters
#[derive(Debug)]
pub struct IngestStats {
    started_at: Instant,
    datagrams_received: AtomicU64,
    bytes_received: AtomicU64,
    oversized: AtomicU64,
    sampled_out: AtomicU64,
    forwarded: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            datagrams_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            oversized: AtomicU64::new(0),
            sampled_out: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_datagram(&self, len: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_oversized(&self) {
        self.oversized.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sampled_out(&self) {
        self.sampled_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough copy of the counters
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            uptime: self.started_at.elapsed(),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
            sampled_out: self.sampled_out.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time ingestion statistics
#[derive(Debug, Clone, Default)]
pub struct IngestSnapshot {
    /// Time since the counters were created
    pub uptime: Duration,
    /// Datagrams read from the socket
    pub datagrams_received: u64,
    /// Payload bytes read from the socket
    pub bytes_received: u64,
    /// Datagrams dropped for exceeding the size bound
    pub oversized: u64,
    /// Datagrams dropped by the sampler
    pub sampled_out: u64,
    /// Datagrams published to the broadcaster
    pub forwarded: u64,
}

impl IngestSnapshot {
    /// Datagrams per second over the whole uptime
    pub fn datagram_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.datagrams_received as f64 / secs
        } else {
            0.0
        }
    }

    /// Observed fraction of well-sized datagrams that were forwarded
    pub fn forward_ratio(&self) -> f64 {
        let considered = self.forwarded + self.sampled_out;
        if considered > 0 {
            self.forwarded as f64 / considered as f64
        } else {
            0.0
        }
    }
}

/// Live broadcaster counters
#[derive(Debug, Default)]
pub struct BroadcastStats {
    published: AtomicU64,
    deliveries: AtomicU64,
    dropped: AtomicU64,
    subscribers_added: AtomicU64,
    subscribers_removed: AtomicU64,
    subscribers_timed_out: AtomicU64,
}

impl BroadcastStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_publish(&self, delivered: usize, dropped: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_added(&self) {
        self.subscribers_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_removed(&self, timed_out: bool) {
        self.subscribers_removed.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.subscribers_timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, active_subscribers: usize) -> BroadcastSnapshot {
        BroadcastSnapshot {
            active_subscribers,
            published: self.published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            subscribers_added: self.subscribers_added.load(Ordering::Relaxed),
            subscribers_removed: self.subscribers_removed.load(Ordering::Relaxed),
            subscribers_timed_out: self.subscribers_timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time broadcaster statistics
#[derive(Debug, Clone, Default)]
pub struct BroadcastSnapshot {
    /// Subscribers currently registered
    pub active_subscribers: usize,
    /// Messages published
    pub published: u64,
    /// Messages enqueued to subscribers (summed over subscribers)
    pub deliveries: u64,
    /// Messages dropped because a subscriber queue was full
    pub dropped: u64,
    /// Subscribers ever registered
    pub subscribers_added: u64,
    /// Subscribers retired for any reason
    pub subscribers_removed: u64,
    /// Subscribers retired by idle or handshake timeout
    pub subscribers_timed_out: u64,
}

/// Per-subscriber statistics
#[derive(Debug, Clone, Default)]
pub struct SubscriberStats {
    /// Messages enqueued for this subscriber
    pub delivered: u64,
    /// Messages dropped because this subscriber's queue was full
    pub dropped: u64,
    /// Time since the subscriber registered
    pub connected_for: Duration,
}
