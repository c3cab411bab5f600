//! Command-line interface

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::server::config::{
    ServerConfig, DEFAULT_HTTP_PORT, DEFAULT_SAMPLE_RATE, DEFAULT_UDP_PORT,
};

/// Relay sampled UDP events to browsers over Server-Sent Events
#[derive(Parser, Debug, Clone)]
#[command(name = "orbital", version, about)]
pub struct Cli {
    /// Listen address for both UDP and HTTP
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// HTTP port
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// UDP port
    #[arg(long, default_value_t = DEFAULT_UDP_PORT)]
    pub udp_port: u16,

    /// Fraction of UDP events to forward to SSE clients (0.0-1.0)
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE, value_parser = parse_rate)]
    pub sample_rate: f64,

    /// Largest accepted datagram in bytes
    #[arg(long, default_value_t = crate::ingest::DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Per-client queue capacity in messages
    #[arg(long, default_value_t = crate::broadcast::config::DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Close clients idle for this many seconds
    #[arg(long, default_value_t = 60)]
    pub idle_timeout_secs: u64,

    /// Close clients that do not start streaming within this many milliseconds
    #[arg(long, default_value_t = 1000)]
    pub handshake_timeout_ms: u64,

    /// Close a client whose connection accepts no data for this many milliseconds
    #[arg(long, default_value_t = 1000)]
    pub write_timeout_ms: u64,

    /// Maximum concurrent clients (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_subscribers: usize,

    /// Directory served under /static
    #[arg(long, default_value = "static")]
    pub static_dir: PathBuf,

    /// Index page template
    #[arg(long, default_value = "templates/index.html")]
    pub template: PathBuf,

    /// Send synthetic test events to the UDP port instead of serving
    #[arg(long)]
    pub test: bool,

    /// Number of test events to send (default: forever)
    #[arg(long, requires = "test")]
    pub test_count: Option<u64>,

    /// Microseconds between test events
    #[arg(long, default_value_t = 500)]
    pub test_interval_us: u64,
}

impl Cli {
    /// Build the server configuration from the parsed flags
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::default()
            .host(self.host)
            .http_port(self.http_port)
            .udp_port(self.udp_port)
            .sample_rate(self.sample_rate)
            .max_message_size(self.max_message_size)
            .queue_capacity(self.queue_capacity)
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .handshake_timeout(Duration::from_millis(self.handshake_timeout_ms))
            .write_timeout(Duration::from_millis(self.write_timeout_ms))
            .max_subscribers(self.max_subscribers)
            .static_dir(self.static_dir.clone())
            .template_path(self.template.clone())
    }

    /// Pause between generated test events
    pub fn test_interval(&self) -> Duration {
        Duration::from_micros(self.test_interval_us)
    }
}

fn parse_rate(value: &str) -> Result<f64, String> {
    let rate: f64 = value
        .parse()
        .map_err(|_| format!("`{}` is not a number", value))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("sample rate must be within [0, 1], got {}", rate))
    }
}
