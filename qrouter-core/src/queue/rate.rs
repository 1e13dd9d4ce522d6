use std::time::{Duration, Instant};

use bandwidth::Bandwidth;

/// Time constant of the exponential moving average.
pub const RATE_TIME_CONSTANT: Duration = Duration::from_secs(1);

/// Exponentially weighted byte-rate estimator driven by the caller's clock.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    bytes_per_sec: f64,
    // Bytes seen at `last_updated` that have not been folded into the average
    pending: u64,
    last_updated: Option<Instant>,
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RateEstimator {
    pub fn new() -> Self {
        Self {
            bytes_per_sec: 0.0,
            pending: 0,
            last_updated: None,
        }
    }

    fn decay(elapsed: Duration) -> f64 {
        (-elapsed.as_secs_f64() / RATE_TIME_CONSTANT.as_secs_f64()).exp()
    }

    pub fn record(&mut self, bytes: usize, now: Instant) {
        let Some(last) = self.last_updated else {
            self.pending = bytes as u64;
            self.last_updated = Some(now);
            return;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed.is_zero() {
            self.pending += bytes as u64;
            return;
        }
        let sample = (self.pending + bytes as u64) as f64 / elapsed.as_secs_f64();
        let keep = Self::decay(elapsed);
        self.bytes_per_sec = keep * self.bytes_per_sec + (1.0 - keep) * sample;
        self.pending = 0;
        self.last_updated = Some(now);
    }

    /// The estimate at `now`, decayed over the time since the last record.
    pub fn current(&self, now: Instant) -> Bandwidth {
        let bytes_per_sec = match self.last_updated {
            Some(last) => self.bytes_per_sec * Self::decay(now.saturating_duration_since(last)),
            None => 0.0,
        };
        Bandwidth::from_bps((bytes_per_sec * 8.0) as u64)
    }
}
