//! Piecewise-linear segmentation of a mapping.
//!
//! Turning points are keys where the least-squares slope of the window to the
//! left differs from the slope of the window to the right by more than a
//! threshold. Each run of such keys contributes its strongest point.

use serde::Serialize;

use crate::mapping::Mapping;
use crate::stats::{linear_regression, safe_ratio, Regression};

/// Segmentation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PiecewiseOptions {
    /// Keys on each side of a candidate turning point.
    pub window: usize,
    /// Minimum |right slope - left slope| for a turning point.
    pub slope_threshold: f64,
    /// Turning points closer than this to either end are ignored.
    pub edge_margin: usize,
    /// Segments with fewer keys are dropped.
    pub min_segment_points: usize,
    /// Upper bound on the number of segments.
    pub max_segments: usize,
}

impl Default for PiecewiseOptions {
    fn default() -> Self {
        Self {
            window: 1000,
            slope_threshold: 0.1,
            edge_margin: 100,
            min_segment_points: 11,
            max_segments: 5,
        }
    }
}

/// One linear piece.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// First original value in the segment.
    pub start_value: u16,
    /// Last original value in the segment.
    pub end_value: u16,
    /// Keys in the segment.
    pub points: usize,
    pub fit: Regression,
}

/// Result of [`piecewise_fit`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PiecewiseFit {
    pub segments: Vec<Segment>,
    /// Original values at which a new segment starts.
    pub turning_points: Vec<u16>,
}

impl PiecewiseFit {
    /// More than one segment survived.
    pub fn is_piecewise(&self) -> bool {
        self.segments.len() > 1
    }
}

/// Prefix sums for O(1) window regressions.
struct Prefix {
    x: Vec<f64>,
    y: Vec<f64>,
    xx: Vec<f64>,
    xy: Vec<f64>,
}

impl Prefix {
    fn new(xs: &[f64], ys: &[f64]) -> Self {
        let n = xs.len();
        let mut p = Prefix {
            x: Vec::with_capacity(n + 1),
            y: Vec::with_capacity(n + 1),
            xx: Vec::with_capacity(n + 1),
            xy: Vec::with_capacity(n + 1),
        };
        let (mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0);
        p.x.push(0.0);
        p.y.push(0.0);
        p.xx.push(0.0);
        p.xy.push(0.0);
        for (&x, &y) in xs.iter().zip(ys) {
            sx += x;
            sy += y;
            sxx += x * x;
            sxy += x * y;
            p.x.push(sx);
            p.y.push(sy);
            p.xx.push(sxx);
            p.xy.push(sxy);
        }
        p
    }

    /// Least-squares slope over indices `lo..hi`.
    fn slope(&self, lo: usize, hi: usize) -> f64 {
        let n = (hi - lo) as f64;
        let sx = self.x[hi] - self.x[lo];
        let sy = self.y[hi] - self.y[lo];
        let sxx = self.xx[hi] - self.xx[lo];
        let sxy = self.xy[hi] - self.xy[lo];
        safe_ratio(n * sxy - sx * sy, n * sxx - sx * sx, 0.0)
    }
}

/// Split a mapping into at most `max_segments` linear pieces.
///
/// Mappings with fewer than `2 * window` keys are returned as one segment.
pub fn piecewise_fit(mapping: &Mapping, options: &PiecewiseOptions) -> PiecewiseFit {
    let (xs, ys) = mapping.columns();
    let n = xs.len();
    let window = options.window.max(2);

    let cuts = if n >= 2 * window {
        turning_indices(&xs, &ys, window, options)
    } else {
        Vec::new()
    };

    let mut segments = Vec::new();
    let mut start = 0;
    for &end in cuts.iter().chain(std::iter::once(&n)) {
        let points = end - start;
        if points >= options.min_segment_points.max(2) {
            segments.push(Segment {
                start_value: xs[start] as u16,
                end_value: xs[end - 1] as u16,
                points,
                fit: linear_regression(&xs[start..end], &ys[start..end]),
            });
        }
        start = end;
    }

    PiecewiseFit {
        turning_points: cuts.iter().map(|&i| xs[i] as u16).collect(),
        segments,
    }
}

fn turning_indices(xs: &[f64], ys: &[f64], window: usize, options: &PiecewiseOptions) -> Vec<usize> {
    let n = xs.len();
    let prefix = Prefix::new(xs, ys);

    // Each run of consecutive candidates keeps its strongest index.
    let mut peaks: Vec<(usize, f64)> = Vec::new();
    let mut run: Option<(usize, f64)> = None;
    for c in window..=n - window {
        let diff = (prefix.slope(c, c + window) - prefix.slope(c - window, c)).abs();
        let inside = c > options.edge_margin && c + options.edge_margin < n;
        if diff > options.slope_threshold && inside {
            run = match run {
                Some((_, best)) if best >= diff => run,
                _ => Some((c, diff)),
            };
        } else if let Some(peak) = run.take() {
            peaks.push(peak);
        }
    }
    if let Some(peak) = run {
        peaks.push(peak);
    }

    let keep = options.max_segments.saturating_sub(1);
    if peaks.len() > keep {
        peaks.sort_by(|a, b| b.1.total_cmp(&a.1));
        peaks.truncate(keep);
    }
    let mut cuts: Vec<usize> = peaks.into_iter().map(|(i, _)| i).collect();
    cuts.sort_unstable();
    cuts
}
