//! Streaming (Welford) accumulation of mean, variance and extrema.

use serde::Serialize;

use super::safe::{squared_deviation, Estimate, SQUARE_SUM_CEILING};

/// Single-pass mean/variance/min/max accumulator.
///
/// Two accumulators can be merged, so per-row partials built in parallel
/// reduce to the same count/min/max and (up to float rounding) the same
/// moments as a sequential pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    saturated: bool,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            saturated: false,
        }
    }
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation. Non-finite values are skipped and flag the result.
    #[inline]
    pub fn push(&mut self, x: f64) {
        if !x.is_finite() {
            self.saturated = true;
            return;
        }
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let contrib = if delta.abs() > super::safe::DEVIATION_LIMIT {
            squared_deviation(delta).0
        } else {
            delta * (x - self.mean)
        };
        self.add_m2(contrib);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    fn add_m2(&mut self, contrib: f64) {
        let next = self.m2 + contrib;
        if next.is_finite() && next <= SQUARE_SUM_CEILING {
            self.m2 = next;
        } else {
            self.m2 = SQUARE_SUM_CEILING;
            self.saturated = true;
        }
        if contrib.abs() > super::safe::DEVIATION_LIMIT * super::safe::DEVIATION_LIMIT {
            self.saturated = true;
        }
    }

    /// Combine two accumulators (Chan et al. parallel update).
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            self.saturated |= other.saturated;
            return;
        }
        if self.count == 0 {
            let saturated = self.saturated || other.saturated;
            *self = *other;
            self.saturated = saturated;
            return;
        }
        let na = self.count as f64;
        let nb = other.count as f64;
        let n = na + nb;
        let delta = other.mean - self.mean;

        self.count += other.count;
        self.mean += delta * nb / n;
        self.saturated |= other.saturated;
        let (sq, approx) = squared_deviation(delta);
        self.saturated |= approx;
        self.add_m2(other.m2 + sq * na * nb / n);
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean, 0 when empty.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Minimum, 0 when empty.
    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    /// Maximum, 0 when empty.
    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    /// Sample variance (n - 1 denominator), 0 for fewer than two observations.
    pub fn variance(&self) -> Estimate {
        let value = if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).max(0.0)
        };
        Estimate {
            value,
            saturated: self.saturated,
        }
    }

    /// Sample standard deviation.
    pub fn std_dev(&self) -> Estimate {
        let var = self.variance();
        Estimate {
            value: var.value.sqrt(),
            saturated: var.saturated,
        }
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }
}
