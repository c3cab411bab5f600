//! Broadcaster configuration

use std::time::Duration;

/// Default per-subscriber queue capacity in messages
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default idle window before an active subscriber is retired
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default window for a new subscriber to start streaming
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default interval of the cleanup sweep
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Broadcaster configuration options
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Bounded queue size per subscriber; messages beyond it are dropped
    pub queue_capacity: usize,

    /// Retire an active subscriber after this long without activity
    pub idle_timeout: Duration,

    /// Retire a pending subscriber that is not activated within this time
    pub handshake_timeout: Duration,

    /// How often the cleanup task sweeps the registry
    pub cleanup_interval: Duration,

    /// Maximum concurrent subscribers (0 = unlimited)
    pub max_subscribers: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            max_subscribers: 0,
        }
    }
}

impl BroadcasterConfig {
    /// Set the per-subscriber queue capacity (at least 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the cleanup sweep interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set maximum concurrent subscribers
    pub fn max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BroadcasterConfig::default();

        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.handshake_timeout, Duration::from_secs(1));
        assert_eq!(config.max_subscribers, 0);
    }

    #[test]
    fn test_queue_capacity_floor() {
        let config = BroadcasterConfig::default().queue_capacity(0);
        assert_eq!(config.queue_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = BroadcasterConfig::default()
            .queue_capacity(16)
            .idle_timeout(Duration::from_secs(5))
            .handshake_timeout(Duration::from_millis(200))
            .cleanup_interval(Duration::from_millis(50))
            .max_subscribers(10);

        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.handshake_timeout, Duration::from_millis(200));
        assert_eq!(config.cleanup_interval, Duration::from_millis(50));
        assert_eq!(config.max_subscribers, 10);
    }
}
