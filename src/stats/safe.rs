//! Overflow- and NaN-guarded numeric primitives.
//!
//! Every function here returns a defined, finite value for any input.
//! When a result had to be capped or approximated, it carries a
//! `saturated` flag instead of failing.

/// Ceiling for integer partial sums (`i64::MAX / 1000`).
pub const SUM_CEILING: i64 = i64::MAX / 1000;

/// Ceiling for running sums of squared deviations.
pub const SQUARE_SUM_CEILING: f64 = f64::MAX / 1000.0;

/// Deviations larger than this contribute `|d| * DEVIATION_LIMIT` instead of `d^2`.
pub const DEVIATION_LIMIT: f64 = 1.0e6;

/// Largest exponent magnitude accepted by [`safe_pow`].
pub const MAX_EXPONENT: f64 = 16.0;

/// Denominators smaller than this are treated as zero.
pub const DENOMINATOR_EPSILON: f64 = 1e-12;

/// Full-scale value of a 16-bit sample.
pub const U16_FULL_SCALE: f64 = 65535.0;

/// A statistic together with a flag telling whether precision was reduced.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Estimate {
    /// The (possibly approximate) value. Always finite.
    pub value: f64,
    /// True when a safety ceiling or approximation was hit.
    pub saturated: bool,
}

impl Estimate {
    fn exact(value: f64) -> Self {
        Self {
            value,
            saturated: false,
        }
    }
}

// ============================================================================
// Sums and ratios
// ============================================================================

/// Integer accumulator that caps instead of wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafeSum {
    total: i64,
    count: u64,
    saturated: bool,
}

impl SafeSum {
    /// Create an empty sum.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one value. Once the ceiling is reached the total stays pinned there.
    #[inline]
    pub fn add(&mut self, value: i64) {
        self.count += 1;
        self.accumulate(value);
    }

    fn accumulate(&mut self, value: i64) {
        if self.saturated {
            return;
        }
        match self.total.checked_add(value) {
            Some(t) if (-SUM_CEILING..=SUM_CEILING).contains(&t) => self.total = t,
            _ => {
                self.total = if value < 0 { -SUM_CEILING } else { SUM_CEILING };
                self.saturated = true;
            }
        }
    }

    /// Combine with another partial sum. Order of merging does not matter
    /// unless the ceiling is hit.
    pub fn merge(&mut self, other: &SafeSum) {
        self.count += other.count;
        self.saturated |= other.saturated;
        self.accumulate(other.total);
    }

    /// Current total.
    pub fn total(&self) -> i64 {
        self.total
    }

    /// Number of values added.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Whether the ceiling was hit.
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    /// Mean of the values added, 0 when empty.
    pub fn mean(&self) -> Estimate {
        Estimate {
            value: safe_ratio(self.total as f64, self.count as f64, 0.0),
            saturated: self.saturated,
        }
    }
}

/// `numerator / denominator`, or `sentinel` when the denominator is ~0 or
/// the quotient is not finite.
#[inline]
pub fn safe_ratio(numerator: f64, denominator: f64, sentinel: f64) -> f64 {
    if !denominator.is_finite() || denominator.abs() < DENOMINATOR_EPSILON {
        return sentinel;
    }
    let r = numerator / denominator;
    if r.is_finite() {
        r
    } else {
        sentinel
    }
}

/// Mean of a slice; non-finite entries are skipped and flag the result.
pub fn safe_mean(values: &[f64]) -> Estimate {
    let mut sum = 0.0f64;
    let mut n = 0u64;
    let mut saturated = false;
    for &v in values {
        if !v.is_finite() {
            saturated = true;
            continue;
        }
        let next = sum + v;
        if next.is_finite() && next.abs() <= SQUARE_SUM_CEILING {
            sum = next;
        } else {
            saturated = true;
        }
        n += 1;
    }
    Estimate {
        value: safe_ratio(sum, n as f64, 0.0),
        saturated,
    }
}

/// Sample variance (n - 1 denominator) with guarded squaring.
pub fn safe_variance(values: &[f64]) -> Estimate {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let mut saturated = finite.len() != values.len();
    if finite.len() < 2 {
        return Estimate {
            value: 0.0,
            saturated,
        };
    }

    let mean = safe_mean(&finite);
    saturated |= mean.saturated;

    let mut sum_sq = 0.0f64;
    for &v in &finite {
        let (contrib, approx) = squared_deviation(v - mean.value);
        saturated |= approx;
        sum_sq += contrib;
        if sum_sq > SQUARE_SUM_CEILING {
            sum_sq = SQUARE_SUM_CEILING;
            saturated = true;
        }
    }

    Estimate {
        value: safe_ratio(sum_sq, (finite.len() - 1) as f64, 0.0),
        saturated,
    }
}

/// Sample standard deviation, see [`safe_variance`].
pub fn safe_std_dev(values: &[f64]) -> Estimate {
    let var = safe_variance(values);
    Estimate {
        value: var.value.max(0.0).sqrt(),
        saturated: var.saturated,
    }
}

/// `d^2`, or the scaled approximation `|d| * DEVIATION_LIMIT` for huge deviations.
#[inline]
pub(crate) fn squared_deviation(d: f64) -> (f64, bool) {
    if d.abs() > DEVIATION_LIMIT {
        (d.abs() * DEVIATION_LIMIT, true)
    } else {
        (d * d, false)
    }
}

// ============================================================================
// Transforms
// ============================================================================

/// Natural log, `None` for non-positive or non-finite input.
#[inline]
pub fn safe_ln(x: f64) -> Option<f64> {
    if x > 0.0 && x.is_finite() {
        Some(x.ln())
    } else {
        None
    }
}

/// `base^exponent` with the exponent capped to `±MAX_EXPONENT`.
///
/// Returns `None` for undefined combinations (negative base with a fractional
/// exponent, zero to a negative power) and for non-finite results.
pub fn safe_pow(base: f64, exponent: f64) -> Option<f64> {
    if !base.is_finite() || !exponent.is_finite() {
        return None;
    }
    let e = exponent.clamp(-MAX_EXPONENT, MAX_EXPONENT);
    if base < 0.0 && e.fract() != 0.0 {
        return None;
    }
    if base == 0.0 && e < 0.0 {
        return None;
    }
    let r = base.powf(e);
    r.is_finite().then_some(r)
}

/// Round and clamp to the 16-bit range. NaN maps to 0.
#[inline]
pub fn clamp_to_u16(v: f64) -> u16 {
    if v.is_nan() {
        return 0;
    }
    v.round().clamp(0.0, U16_FULL_SCALE) as u16
}

/// Raw power transform `v^exponent`, clamped; falls back to `value` when undefined.
pub fn power_transform(value: u16, exponent: f64) -> u16 {
    match safe_pow(value as f64, exponent) {
        Some(r) => clamp_to_u16(r),
        None => value,
    }
}

/// Gamma correction on the normalized value: `(v / 65535)^(1 / gamma)`.
///
/// Gamma < 1.0 darkens, > 1.0 brightens the 16-bit value; falls back to
/// `value` for non-positive or non-finite gamma.
pub fn gamma_transform(value: u16, gamma: f64) -> u16 {
    if !gamma.is_finite() || gamma <= 0.0 {
        return value;
    }
    let inv_gamma = 1.0 / gamma.max(0.001);
    let normalized = value as f64 / U16_FULL_SCALE;
    match safe_pow(normalized, inv_gamma) {
        Some(r) => clamp_to_u16(r * U16_FULL_SCALE),
        None => value,
    }
}

/// Log transform scaled so that full scale maps to `gain * 65535`.
pub fn log_transform(value: u16, gain: f64) -> u16 {
    let scale = U16_FULL_SCALE / (U16_FULL_SCALE + 1.0).ln();
    let r = gain * scale * (value as f64 + 1.0).ln();
    if r.is_finite() {
        clamp_to_u16(r)
    } else {
        value
    }
}
