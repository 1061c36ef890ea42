//! Ordinary least squares and Pearson correlation over paired samples.

use serde::{Deserialize, Serialize};

use super::safe::safe_ratio;

/// Sums of squares at or below this are treated as zero variance.
const DEGENERATE_VARIANCE: f64 = 1e-9;

/// Result of a least-squares line fit `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination in [0, 1].
    pub r_squared: f64,
    /// Pearson correlation in [-1, 1].
    pub correlation: f64,
    /// Number of pairs used.
    pub n: usize,
}

impl Regression {
    /// Evaluate the fitted line at `x`.
    #[inline]
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Fit `ys` against `xs` using centered sums.
///
/// Pairs beyond the shorter slice and pairs containing non-finite values are
/// ignored. Degenerate inputs never produce NaN:
/// - fewer than one pair: all zeros
/// - constant `x`: slope 0, intercept mean(y), r² 0
/// - constant `y` with varying `x`: slope 0, intercept mean(y), r² 1
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Regression {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .map(|(&x, &y)| (x, y))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    let n = pairs.len();
    if n == 0 {
        return Regression::default();
    }

    let nf = n as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / nf;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / nf;

    let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
    for &(x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    if !sxx.is_finite() || !syy.is_finite() || !sxy.is_finite() || sxx <= DEGENERATE_VARIANCE {
        return Regression {
            slope: 0.0,
            intercept: if mean_y.is_finite() { mean_y } else { 0.0 },
            r_squared: 0.0,
            correlation: 0.0,
            n,
        };
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    if syy <= DEGENERATE_VARIANCE {
        return Regression {
            slope: 0.0,
            intercept: mean_y,
            r_squared: 1.0,
            correlation: 0.0,
            n,
        };
    }

    let correlation = safe_ratio(sxy, (sxx * syy).sqrt(), 0.0).clamp(-1.0, 1.0);

    Regression {
        slope,
        intercept,
        r_squared: correlation * correlation,
        correlation,
        n,
    }
}

/// Pearson correlation, 0 when either side has no variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    linear_regression(xs, ys).correlation
}
