//! Server configuration
//!
//! Everything is fixed at process start; nothing is reloaded at runtime.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::broadcast::config::{
    BroadcasterConfig, DEFAULT_CLEANUP_INTERVAL, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_QUEUE_CAPACITY,
};
use crate::error::{Error, Result};
use crate::ingest::DEFAULT_MAX_MESSAGE_SIZE;

/// Default fraction of datagrams forwarded to subscribers
pub const DEFAULT_SAMPLE_RATE: f64 = 0.05;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 7000;

/// Default UDP ingestion port
pub const DEFAULT_UDP_PORT: u16 = 5556;

/// Default limit on a stalled HTTP write before the connection is closed
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address both listeners bind to
    pub host: IpAddr,

    /// HTTP port (0 = ephemeral)
    pub http_port: u16,

    /// UDP ingestion port (0 = ephemeral)
    pub udp_port: u16,

    /// Fraction of datagrams forwarded, in `[0, 1]`
    pub sample_rate: f64,

    /// Largest accepted datagram payload in bytes
    pub max_message_size: usize,

    /// Per-subscriber queue capacity in messages
    pub queue_capacity: usize,

    /// Idle timeout (retire a subscriber with no activity)
    pub idle_timeout: Duration,

    /// Handshake timeout (new subscriber must start streaming within this time)
    pub handshake_timeout: Duration,

    /// Interval of the subscriber cleanup sweep
    pub cleanup_interval: Duration,

    /// Close an HTTP connection whose pending write makes no progress for this long
    pub write_timeout: Duration,

    /// Maximum concurrent subscribers (0 = unlimited)
    pub max_subscribers: usize,

    /// Stats log interval
    pub stats_interval: Duration,

    /// Directory served under `/static`
    pub static_dir: PathBuf,

    /// Index page template
    pub template_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: DEFAULT_HTTP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_subscribers: 0, // Unlimited
            stats_interval: Duration::from_secs(5),
            static_dir: PathBuf::from("static"),
            template_path: PathBuf::from("templates/index.html"),
        }
    }
}

impl ServerConfig {
    /// HTTP listen address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.http_port)
    }

    /// UDP listen address
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.udp_port)
    }

    /// Broadcaster settings derived from this configuration
    pub fn broadcaster_config(&self) -> BroadcasterConfig {
        BroadcasterConfig::default()
            .queue_capacity(self.queue_capacity)
            .idle_timeout(self.idle_timeout)
            .handshake_timeout(self.handshake_timeout)
            .cleanup_interval(self.cleanup_interval)
            .max_subscribers(self.max_subscribers)
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(Error::Config(format!(
                "sample rate must be within [0, 1], got {}",
                self.sample_rate
            )));
        }
        if self.max_message_size == 0 {
            return Err(Error::Config("max message size must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be positive".into()));
        }
        if self.idle_timeout.is_zero()
            || self.handshake_timeout.is_zero()
            || self.write_timeout.is_zero()
        {
            return Err(Error::Config("timeouts must be positive".into()));
        }
        if self.cleanup_interval.is_zero() || self.stats_interval.is_zero() {
            return Err(Error::Config("intervals must be positive".into()));
        }
        Ok(())
    }

    /// Set the listen host
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Set the HTTP port
    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Set the UDP port
    pub fn udp_port(mut self, port: u16) -> Self {
        self.udp_port = port;
        self
    }

    /// Set the sample rate
    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the per-subscriber queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the cleanup sweep interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the HTTP write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set maximum subscribers
    pub fn max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers = max;
        self
    }

    /// Set the static asset directory
    pub fn static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = dir.into();
        self
    }

    /// Set the index template path
    pub fn template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = path.into();
        self
    }
}
