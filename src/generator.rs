//! Synthetic event generator for demos
//!
//! Produces payloads in the `[lat,lng,timestamp_ms,"platform"]` shape used by
//! the browser client and sends them over UDP at a fixed rate. It is a plain
//! UDP producer and shares nothing with the relay itself.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use rand::prelude::*;
use rand::rngs::SmallRng;
use tokio::net::UdpSocket;

use crate::error::Result;

/// Default pause between generated events
pub const DEFAULT_INTERVAL: Duration = Duration::from_micros(500);

/// Platforms, repeated to approximate a realistic mix
const PLATFORMS: &[&str] = &[
    "javascript",
    "javascript",
    "javascript",
    "node",
    "node",
    "node",
    "python",
    "python",
    "java",
    "java",
    "cocoa",
    "php",
    "csharp",
    "ruby",
    "go",
    "native",
    "elixir",
];

/// (latitude, longitude) of populated places events cluster around
const CITIES: &[(f64, f64)] = &[
    (40.7, -74.0),
    (37.8, -122.4),
    (51.5, -0.1),
    (48.9, 2.3),
    (52.5, 13.4),
    (35.7, 139.7),
    (39.9, 116.4),
    (31.2, 121.5),
    (-33.9, 151.2),
    (-23.5, -46.6),
    (19.1, 72.9),
    (12.9, 77.6),
    (30.0, 31.2),
    (6.5, 3.4),
    (19.4, -99.1),
    (-34.6, -58.4),
    (55.8, 37.6),
    (41.0, 29.0),
    (37.6, 127.0),
    (1.3, 103.8),
    (25.2, 55.3),
    (43.7, -79.4),
    (41.9, -87.6),
    (34.1, -118.2),
    (47.6, -122.3),
    (25.8, -80.2),
    (52.4, 4.9),
    (59.3, 18.1),
    (40.4, -3.7),
    (41.9, 12.5),
    (22.3, 114.2),
    (-6.2, 106.8),
    (13.8, 100.5),
    (-1.3, 36.8),
    (-33.9, 18.4),
    (4.7, -74.1),
    (-12.0, -77.0),
    (-33.5, -70.6),
    (45.5, -73.6),
    (50.1, 8.7),
    (53.3, -6.3),
    (59.9, 10.8),
    (60.2, 25.0),
    (47.4, 8.5),
    (50.9, 4.4),
    (38.7, -9.1),
    (37.9, 23.7),
    (44.8, 20.5),
    (50.1, 14.4),
    (47.5, 19.1),
    (52.2, 21.0),
    (59.4, 24.7),
    (23.1, 113.3),
    (28.6, 77.2),
    (24.9, 67.0),
    (33.7, 73.1),
    (23.8, 90.4),
    (6.9, 79.9),
    (3.1, 101.7),
    (14.6, 121.0),
    (10.8, 106.7),
    (16.8, 96.2),
    (27.7, 85.3),
    (-4.3, 15.3),
    (5.6, -0.2),
    (12.4, -1.5),
    (9.1, 7.4),
    (-26.2, 28.0),
    (-17.8, 31.0),
    (-8.8, 13.2),
    (33.9, -6.9),
    (36.8, 10.2),
    (32.9, 13.2),
    (15.6, 32.5),
    (2.0, 45.3),
    (-18.9, 47.5),
    (-25.9, 32.6),
    (-15.4, 28.3),
    (-13.0, -38.5),
    (-3.1, -60.0),
    (-30.0, -51.2),
    (10.5, -66.9),
    (-0.2, -78.5),
    (-16.5, -68.2),
    (-11.2, 17.9),
    (32.1, 34.8),
    (33.9, 35.5),
    (33.3, 44.4),
    (35.7, 51.4),
    (41.3, 69.3),
    (43.3, 76.9),
    (51.2, 71.5),
    (47.9, 106.9),
    (-36.9, 174.8),
    (-27.5, 153.0),
    (-31.9, 115.9),
    (-37.8, 145.0),
    (21.3, -157.8),
    (61.2, -149.9),
    (64.8, -147.7),
    (45.4, -75.7),
    (49.3, -123.1),
    (51.0, -114.1),
    (53.5, -113.5),
];

/// Maximum jitter applied to city coordinates, in degrees
const JITTER_DEGREES: f64 = 1.0;

/// Random event source
#[derive(Clone)]
pub struct EventGenerator {
    rng: SmallRng,
}

impl EventGenerator {
    /// Create a new generator
    ///
    /// If seed is 0, uses random entropy for non-deterministic behavior.
    /// Otherwise, uses the provided seed for reproducible results.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// Next event payload stamped with the current time
    pub fn next_event(&mut self) -> Bytes {
        self.event_at(chrono::Utc::now().timestamp_millis())
    }

    /// Next event payload with an explicit timestamp in milliseconds
    pub fn event_at(&mut self, timestamp_ms: i64) -> Bytes {
        let (lat, lng) = CITIES[self.rng.gen_range(0..CITIES.len())];
        let lat = lat + self.rng.gen_range(-JITTER_DEGREES..JITTER_DEGREES);
        let lng = lng + self.rng.gen_range(-JITTER_DEGREES..JITTER_DEGREES);
        let platform = PLATFORMS[self.rng.gen_range(0..PLATFORMS.len())];

        Bytes::from(format!(
            "[{:.4},{:.4},{},\"{}\"]",
            lat, lng, timestamp_ms, platform
        ))
    }
}

impl Default for EventGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Send generated events to `target`
///
/// Sends `count` events, or forever when `count` is `None`. Returns the
/// number of events sent. Send errors (e.g. nobody listening yet) are
/// logged and skipped.
pub async fn run(target: SocketAddr, interval: Duration, count: Option<u64>) -> Result<u64> {
    let local = if target.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };
    let socket = UdpSocket::bind(local).await?;
    let mut generator = EventGenerator::default();

    tracing::info!(
        addr = %target,
        interval_us = interval.as_micros() as u64,
        "Sending test events"
    );

    let mut ticker = tokio::time::interval(interval.max(Duration::from_micros(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut sent = 0u64;
    while count.map_or(true, |limit| sent < limit) {
        ticker.tick().await;
        let event = generator.next_event();
        if let Err(e) = socket.send_to(&event, target).await {
            tracing::debug!(error = %e, "Failed to send test event");
            continue;
        }
        sent += 1;
    }

    Ok(sent)
}
