//! Similarity of two runs, e.g. the same algorithm applied to two images.
//!
//! ## Measures
//!
//! - **Fit**: slope, intercept and R² of the two linear fits
//! - **Distribution**: two-sample Kolmogorov-Smirnov test on the original
//!   values and on the target values
//! - **Delta correlation**: Pearson correlation of the per-pixel deltas of
//!   two runs over the same pixels

use serde::Serialize;

use crate::mapping::{Mapping, LUT_SIZE};
use crate::sampling::Sample;
use crate::stats::{linear_regression, Regression};

/// Overall similarity above which two fits describe the same algorithm.
pub const SIMILARITY_THRESHOLD: f64 = 0.8;

/// Per-parameter and overall similarity in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitComparison {
    pub slope_similarity: f64,
    pub intercept_similarity: f64,
    pub r_squared_similarity: f64,
    pub overall: f64,
}

impl FitComparison {
    pub fn is_similar(&self) -> bool {
        self.overall > SIMILARITY_THRESHOLD
    }
}

/// Compare two fits.
///
/// Intercepts are weighted by 0.01 since they live on the 16-bit value scale
/// while slopes and R² are near unit scale.
pub fn compare_fits(a: &Regression, b: &Regression) -> FitComparison {
    let slope_diff = (a.slope - b.slope).abs();
    let intercept_diff = (a.intercept - b.intercept).abs() * 0.01;
    let r2_diff = (a.r_squared - b.r_squared).abs();

    let overall = 1.0 - (slope_diff + intercept_diff + r2_diff) / 3.0;
    let unit = |d: f64| if d.is_finite() { 1.0 - d.min(1.0) } else { 0.0 };

    FitComparison {
        slope_similarity: unit(slope_diff),
        intercept_similarity: unit(intercept_diff),
        r_squared_similarity: unit(r2_diff),
        overall: if overall.is_finite() {
            overall.clamp(0.0, 1.0)
        } else {
            0.0
        },
    }
}

/// Fit both mappings and compare the fits.
pub fn compare_mappings(a: &Mapping, b: &Mapping) -> FitComparison {
    let (ax, ay) = a.columns();
    let (bx, by) = b.columns();
    compare_fits(&linear_regression(&ax, &ay), &linear_regression(&bx, &by))
}

// ============================================================================
// Distributions
// ============================================================================

/// p-value above which two distributions are treated as the same.
pub const KS_SIGNIFICANCE: f64 = 0.05;

/// Two-sample Kolmogorov-Smirnov result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KsTest {
    /// Largest distance between the two empirical CDFs, in [0, 1].
    pub statistic: f64,
    /// Asymptotic p-value; 1 when either side is empty.
    pub p_value: f64,
}

impl KsTest {
    pub fn is_similar(&self) -> bool {
        self.p_value > KS_SIGNIFICANCE
    }
}

/// Counts of 16-bit values, the basis of the KS statistic.
#[derive(Debug, Clone)]
pub struct ValueHistogram {
    counts: Vec<u64>,
    total: u64,
}

impl Default for ValueHistogram {
    fn default() -> Self {
        Self {
            counts: vec![0; LUT_SIZE],
            total: 0,
        }
    }
}

impl ValueHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, value: u16) {
        self.counts[value as usize] += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Two-sample KS test against another histogram.
    pub fn ks_test(&self, other: &ValueHistogram) -> KsTest {
        if self.total == 0 || other.total == 0 {
            return KsTest {
                statistic: 0.0,
                p_value: 1.0,
            };
        }
        let (na, nb) = (self.total as f64, other.total as f64);
        let (mut ca, mut cb) = (0u64, 0u64);
        let mut d = 0.0f64;
        for (a, b) in self.counts.iter().zip(&other.counts) {
            ca += a;
            cb += b;
            d = d.max((ca as f64 / na - cb as f64 / nb).abs());
        }
        let en = (na * nb / (na + nb)).sqrt();
        KsTest {
            statistic: d,
            p_value: kolmogorov_q((en + 0.12 + 0.11 / en) * d),
        }
    }
}

/// Two-sample KS test on raw values.
pub fn ks_statistic(a: &[u16], b: &[u16]) -> KsTest {
    let mut ha = ValueHistogram::new();
    let mut hb = ValueHistogram::new();
    a.iter().for_each(|&v| ha.add(v));
    b.iter().for_each(|&v| hb.add(v));
    ha.ks_test(&hb)
}

/// Survival function of the Kolmogorov distribution.
fn kolmogorov_q(lambda: f64) -> f64 {
    if !lambda.is_finite() || lambda < 0.2 {
        return 1.0;
    }
    let a2 = -2.0 * lambda * lambda;
    let mut sum = 0.0;
    let mut sign = 1.0;
    for j in 1..=100 {
        let j = j as f64;
        let term = sign * 2.0 * (a2 * j * j).exp();
        sum += term;
        if term.abs() <= 1e-12 * sum.abs() || term.abs() < 1e-300 {
            break;
        }
        sign = -sign;
    }
    sum.clamp(0.0, 1.0)
}

// ============================================================================
// Runs
// ============================================================================

/// Full comparison of two runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunComparison {
    pub fit: FitComparison,
    pub original_distribution: KsTest,
    pub target_distribution: KsTest,
    /// Pearson correlation of paired deltas; `None` when the runs are not
    /// paired or either delta series is constant.
    pub delta_correlation: Option<f64>,
}

impl RunComparison {
    /// Fits agree and both value distributions pass the KS test.
    pub fn is_similar(&self) -> bool {
        self.fit.is_similar()
            && self.original_distribution.is_similar()
            && self.target_distribution.is_similar()
    }

    /// Deltas move together (|r| > 0.8).
    pub fn is_consistent(&self) -> bool {
        self.delta_correlation.is_some_and(|r| r.abs() > SIMILARITY_THRESHOLD)
    }
}

/// Streaming accumulator for [`RunComparison`].
///
/// Feed paired samples (same pixel, two runs) with [`observe_pair`]; the
/// distributions and the delta correlation are built in one pass.
///
/// [`observe_pair`]: RunComparator::observe_pair
#[derive(Debug, Clone, Default)]
pub struct RunComparator {
    originals: (ValueHistogram, ValueHistogram),
    targets: (ValueHistogram, ValueHistogram),
    deltas: CoMoments,
}

impl RunComparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the same pixel as seen by run `a` and run `b`.
    pub fn observe_pair(&mut self, a: &Sample, b: &Sample) {
        self.originals.0.add(a.original);
        self.originals.1.add(b.original);
        self.targets.0.add(a.target);
        self.targets.1.add(b.target);
        self.deltas.push(a.delta() as f64, b.delta() as f64);
    }

    /// Combine with the fit comparison of the two runs.
    pub fn finish(&self, fit: FitComparison) -> RunComparison {
        RunComparison {
            fit,
            original_distribution: self.originals.0.ks_test(&self.originals.1),
            target_distribution: self.targets.0.ks_test(&self.targets.1),
            delta_correlation: self.deltas.correlation(),
        }
    }
}

/// Compare two sample sets, e.g. two exports of the same algorithm.
///
/// Fits are taken over the raw samples. Delta correlation requires equal
/// lengths; samples are paired by index.
pub fn compare_runs(a: &[Sample], b: &[Sample]) -> RunComparison {
    let fit = compare_fits(&sample_regression(a), &sample_regression(b));
    let mut ha = (ValueHistogram::new(), ValueHistogram::new());
    let mut hb = (ValueHistogram::new(), ValueHistogram::new());
    for s in a {
        ha.0.add(s.original);
        ha.1.add(s.target);
    }
    for s in b {
        hb.0.add(s.original);
        hb.1.add(s.target);
    }

    let delta_correlation = if a.len() == b.len() {
        let mut deltas = CoMoments::default();
        for (sa, sb) in a.iter().zip(b) {
            deltas.push(sa.delta() as f64, sb.delta() as f64);
        }
        deltas.correlation()
    } else {
        None
    };

    RunComparison {
        fit,
        original_distribution: ha.0.ks_test(&hb.0),
        target_distribution: ha.1.ks_test(&hb.1),
        delta_correlation,
    }
}

fn sample_regression(samples: &[Sample]) -> Regression {
    let xs: Vec<f64> = samples.iter().map(|s| s.original as f64).collect();
    let ys: Vec<f64> = samples.iter().map(|s| s.target as f64).collect();
    linear_regression(&xs, &ys)
}

/// Streaming co-moments for a Pearson correlation.
#[derive(Debug, Clone, Copy, Default)]
struct CoMoments {
    n: u64,
    mean_x: f64,
    mean_y: f64,
    m2_x: f64,
    m2_y: f64,
    c_xy: f64,
}

impl CoMoments {
    #[inline]
    fn push(&mut self, x: f64, y: f64) {
        self.n += 1;
        let n = self.n as f64;
        let dx = x - self.mean_x;
        self.mean_x += dx / n;
        let dy = y - self.mean_y;
        self.mean_y += dy / n;
        self.m2_x += dx * (x - self.mean_x);
        self.m2_y += dy * (y - self.mean_y);
        self.c_xy += dx * (y - self.mean_y);
    }

    fn correlation(&self) -> Option<f64> {
        let denom = (self.m2_x * self.m2_y).sqrt();
        if self.n < 2 || !denom.is_finite() || denom <= f64::EPSILON {
            return None;
        }
        let r = self.c_xy / denom;
        r.is_finite().then(|| r.clamp(-1.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_fits() {
        let m = Mapping::from_pairs((0..100u16).map(|x| (x * 10, x * 20 + 5)));
        let cmp = compare_mappings(&m, &m);
        assert!((cmp.overall - 1.0).abs() < 1e-12);
        assert!(cmp.is_similar());
    }

    #[test]
    fn test_different_slopes() {
        let a = Regression {
            slope: 1.0,
            intercept: 0.0,
            r_squared: 1.0,
            ..Default::default()
        };
        let b = Regression {
            slope: 2.0,
            intercept: 50.0,
            r_squared: 0.9,
            ..Default::default()
        };
        let cmp = compare_fits(&a, &b);

        assert_eq!(cmp.slope_similarity, 0.0);
        assert!((cmp.intercept_similarity - 0.5).abs() < 1e-12);
        assert!((cmp.overall - (1.0 - 1.6 / 3.0)).abs() < 1e-12);
        assert!(!cmp.is_similar());
    }

    #[test]
    fn test_overall_never_negative() {
        let a = Regression::default();
        let b = Regression {
            slope: 100.0,
            intercept: 60000.0,
            ..Default::default()
        };
        assert_eq!(compare_fits(&a, &b).overall, 0.0);
    }

    #[test]
    fn test_ks_identical_and_disjoint() {
        let a: Vec<u16> = (0..500).collect();
        let same = ks_statistic(&a, &a);
        assert_eq!(same.statistic, 0.0);
        assert_eq!(same.p_value, 1.0);
        assert!(same.is_similar());

        let b: Vec<u16> = (1000..1500).collect();
        let apart = ks_statistic(&a, &b);
        assert!((apart.statistic - 1.0).abs() < 1e-12);
        assert!(apart.p_value < 1e-6);
        assert!(!apart.is_similar());
    }

    #[test]
    fn test_ks_shifted_half() {
        // [0, 100) vs [50, 150): the CDFs differ by at most one half
        let a: Vec<u16> = (0..100).collect();
        let b: Vec<u16> = (50..150).collect();
        let ks = ks_statistic(&a, &b);
        assert!((ks.statistic - 0.5).abs() < 1e-12);
        assert!(ks.p_value > 0.0 && ks.p_value < KS_SIGNIFICANCE);
    }

    #[test]
    fn test_ks_empty_side() {
        let ks = ks_statistic(&[], &[1, 2, 3]);
        assert_eq!((ks.statistic, ks.p_value), (0.0, 1.0));
    }

    #[test]
    fn test_compare_runs_delta_correlation() {
        let a: Vec<Sample> = (0..200u16).map(|v| Sample::new(v as u32, 0, v * 100, v * 50)).collect();
        // Same pixels, deltas scaled by a constant: perfectly correlated
        let b: Vec<Sample> =
            (0..200u16).map(|v| Sample::new(v as u32, 0, v * 100, v * 100 - v * 25)).collect();

        let cmp = compare_runs(&a, &b);

        assert_eq!(cmp.original_distribution.statistic, 0.0);
        assert!(cmp.target_distribution.statistic > 0.0);
        assert!((cmp.delta_correlation.unwrap() - 1.0).abs() < 1e-9);
        assert!(cmp.is_consistent());
        assert!(compare_runs(&a, &b[..10]).delta_correlation.is_none());
    }

    #[test]
    fn test_streaming_comparator_matches_slices() {
        let a: Vec<Sample> =
            (0..300u32).map(|i| Sample::new(i, 0, (i * 37 % 4000) as u16, (i * 11 % 900) as u16)).collect();
        let b: Vec<Sample> =
            (0..300u32).map(|i| Sample::new(i, 0, (i * 37 % 4000) as u16, (i * 13 % 700) as u16)).collect();

        let mut comparator = RunComparator::new();
        for (sa, sb) in a.iter().zip(&b) {
            comparator.observe_pair(sa, sb);
        }
        let direct = compare_runs(&a, &b);
        let streamed = comparator.finish(direct.fit);

        assert_eq!(streamed.original_distribution, direct.original_distribution);
        assert_eq!(streamed.target_distribution, direct.target_distribution);
        let (r1, r2) = (streamed.delta_correlation.unwrap(), direct.delta_correlation.unwrap());
        assert!((r1 - r2).abs() < 1e-12);
    }
}
