//! Probabilistic sampling of ingested events
//!
//! Each message gets one independent Bernoulli draw. Draws come from the
//! calling thread's own generator (`rand::thread_rng`), so concurrent
//! ingestion tasks on different worker threads never share a random stream.

use rand::Rng;

/// Decide whether a single message is forwarded.
///
/// Returns `true` iff a uniform draw in `[0, 1)` is strictly less than `rate`.
/// Rates at or below zero (and NaN) never forward; rates at or above one
/// always forward without consuming randomness.
pub fn should_forward(rate: f64) -> bool {
    if rate.is_nan() || rate <= 0.0 {
        return false;
    }
    if rate >= 1.0 {
        return true;
    }
    rand::thread_rng().gen::<f64>() < rate
}

/// Sampler bound to a fixed keep-fraction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampler {
    rate: f64,
}

impl Sampler {
    /// Create a sampler forwarding roughly `rate` of all messages.
    ///
    /// Out-of-range values are clamped into `[0, 1]`; NaN becomes 0.
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self { rate }
    }

    /// Sampler that forwards everything
    pub fn all() -> Self {
        Self { rate: 1.0 }
    }

    /// Sampler that drops everything
    pub fn none() -> Self {
        Self { rate: 0.0 }
    }

    /// Configured keep-fraction
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Draw once for one message
    #[inline]
    pub fn should_forward(&self) -> bool {
        should_forward(self.rate)
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(crate::server::config::DEFAULT_SAMPLE_RATE)
    }
}
