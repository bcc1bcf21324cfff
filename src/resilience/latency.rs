//! Streaming latency estimator.
//!
//! Keeps an exponential moving average for the mean and a fixed histogram
//! for percentiles, so memory stays constant no matter how many calls fire.

use std::collections::BTreeMap;
use std::time::Duration;

/// Percentiles reported in breaker snapshots.
pub const TRACKED_PERCENTILES: [f64; 9] = [0.0, 0.25, 0.5, 0.75, 0.9, 0.95, 0.99, 0.995, 1.0];

/// Upper bounds of the histogram buckets, in milliseconds.
const BUCKET_BOUNDS_MS: [f64; 14] = [
    1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
    30000.0,
];

#[derive(Debug, Clone)]
pub struct LatencyTracker {
    alpha: f64,
    mean_ms: Option<f64>,
    /// One slot per bound plus an overflow slot.
    counts: [u64; BUCKET_BOUNDS_MS.len() + 1],
    total: u64,
    min_ms: f64,
    max_ms: f64,
}

impl LatencyTracker {
    /// `alpha` is the weight of the newest sample in the moving average.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            mean_ms: None,
            counts: [0; BUCKET_BOUNDS_MS.len() + 1],
            total: 0,
            min_ms: 0.0,
            max_ms: 0.0,
        }
    }

    pub fn record(&mut self, latency: Duration) {
        let sample = latency.as_nanos() as f64 / 1_000_000.0;

        self.mean_ms = Some(match self.mean_ms {
            None => sample,
            Some(mean) => mean + self.alpha * (sample - mean),
        });

        let slot = BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| sample <= *bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.counts[slot] += 1;

        if self.total == 0 {
            self.min_ms = sample;
            self.max_ms = sample;
        } else {
            self.min_ms = self.min_ms.min(sample);
            self.max_ms = self.max_ms.max(sample);
        }
        self.total += 1;
    }

    /// Moving-average latency in milliseconds (0 before the first sample).
    pub fn mean_ms(&self) -> f64 {
        self.mean_ms.unwrap_or(0.0)
    }

    pub fn samples(&self) -> u64 {
        self.total
    }

    /// Estimated latency at quantile `p` (0..=1), in milliseconds.
    ///
    /// Resolution is one histogram bucket; the result never leaves the
    /// observed min/max range.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        if p <= 0.0 {
            return self.min_ms;
        }
        if p >= 1.0 {
            return self.max_ms;
        }

        let rank = ((p * self.total as f64).ceil() as u64).max(1);
        let mut cumulative = 0;
        for (slot, count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= rank {
                let upper = BUCKET_BOUNDS_MS.get(slot).copied().unwrap_or(self.max_ms);
                return upper.clamp(self.min_ms, self.max_ms);
            }
        }
        self.max_ms
    }

    /// All tracked percentiles keyed by their quantile ("0.5", "0.99", ...).
    pub fn percentiles(&self) -> BTreeMap<String, f64> {
        TRACKED_PERCENTILES
            .iter()
            .map(|p| (p.to_string(), self.percentile(*p)))
            .collect()
    }
}
