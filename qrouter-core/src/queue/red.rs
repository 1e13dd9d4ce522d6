// RED (Random Early Detection) admission state.
// Reference: Floyd & Jacobson, "Random Early Detection Gateways for
// Congestion Avoidance", 1993.

use std::time::Instant;

use rand::Rng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::qdisc::RedParams;

/// Weight of the instantaneous occupancy in the moving average.
pub const AVERAGE_WEIGHT: f64 = 0.9;
/// While idle the average decays by this factor per [`IDLE_TIME_UNIT`].
pub const IDLE_DECAY_BASE: f64 = 0.1;
/// Seconds
pub const IDLE_TIME_UNIT: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedVerdict {
    Admit,
    /// Probabilistic drop inside the threshold band
    EarlyDrop,
    /// Average above the max threshold
    ForcedDrop,
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedSnapshot {
    pub average: f64,
    pub count: i64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub max_probability: f64,
}

#[derive(Debug, Clone)]
pub struct RedState {
    average: f64,
    count: i64, // packets since the last drop, -1 when below the band
    idle_since: Instant,
    min_threshold: f64,
    max_threshold: f64,
    max_probability: f64,
}

impl RedState {
    /// Scale the ratios of `params` by `capacity` packets.
    pub fn new(params: &RedParams, capacity: usize, now: Instant) -> Self {
        let capacity = capacity as f64;
        Self {
            average: 0.0,
            count: -1,
            idle_since: now,
            min_threshold: params.min_threshold * capacity,
            max_threshold: params.max_threshold * capacity,
            max_probability: params.max_probability,
        }
    }

    pub fn thresholds(&self) -> (f64, f64) {
        (self.min_threshold, self.max_threshold)
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn snapshot(&self) -> RedSnapshot {
        RedSnapshot {
            average: self.average,
            count: self.count,
            min_threshold: self.min_threshold,
            max_threshold: self.max_threshold,
            max_probability: self.max_probability,
        }
    }

    /// Record that the queue just drained, so the next arrival decays the average.
    pub fn mark_idle(&mut self, now: Instant) {
        self.idle_since = now;
    }

    fn update_average(&mut self, occupancy: usize, now: Instant) {
        if occupancy > 0 {
            self.average += AVERAGE_WEIGHT * (occupancy as f64 - self.average);
        } else {
            let idle = now.saturating_duration_since(self.idle_since).as_secs_f64();
            self.average *= IDLE_DECAY_BASE.powf(idle / IDLE_TIME_UNIT);
            // Arrivals to an empty queue that get dropped keep it idle
            self.idle_since = now;
        }
    }

    // Probability inside the band for the current count
    fn band_probability(&self, average: f64) -> f64 {
        let headroom = self.max_threshold - average;
        if headroom <= 0.0 {
            return 1.0;
        }
        let pb = self.max_probability * (average - self.min_threshold) / headroom;
        let denominator = 1.0 - self.count as f64 * pb;
        if denominator <= 0.0 {
            1.0
        } else {
            (pb / denominator).clamp(0.0, 1.0)
        }
    }

    /// Drop probability an arrival would face at `average` with the current count.
    pub fn drop_probability(&self, average: f64) -> f64 {
        if average < self.min_threshold {
            0.0
        } else if average > self.max_threshold {
            1.0
        } else {
            self.band_probability(average)
        }
    }

    pub fn decide<R: Rng>(&mut self, occupancy: usize, now: Instant, rng: &mut R) -> RedVerdict {
        self.update_average(occupancy, now);
        let average = self.average;

        let verdict = if average > self.max_threshold {
            self.count = 0;
            RedVerdict::ForcedDrop
        } else if average >= self.min_threshold {
            self.count += 1;
            let pa = self.band_probability(average);
            let sample: f64 = rng.random_range(0.0..1.0);
            if pa > 0.0 && sample <= pa {
                self.count = 0;
                RedVerdict::EarlyDrop
            } else {
                RedVerdict::Admit
            }
        } else {
            self.count = -1;
            RedVerdict::Admit
        };
        trace!(
            occupancy,
            average,
            count = self.count,
            ?verdict,
            "RED decision"
        );
        verdict
    }
}
