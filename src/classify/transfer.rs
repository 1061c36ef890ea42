//! Transfer-function classification.
//!
//! A least-squares line over the sparse mapping gives linearity (R²), slope
//! and intercept. The decision table below is evaluated top to bottom and
//! the first matching row wins:
//!
//! | Condition | Class |
//! |---|---|
//! | linearity > linear, \|slope - 1\| < tolerance | linear translation |
//! | linearity > linear, slope > 1 | linear amplification |
//! | linearity > linear, slope < 1 | linear attenuation |
//! | linearity > approximately_linear | approximately linear |
//! | log-log correlation > gamma_correlation | gamma-like |
//! | both half slopes > contrast_segment_slope | contrast enhancement |
//! | otherwise | complex non-linear |

use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::distribution::{is_local_contrast, mapping_distribution, MappingDistribution};
use crate::config::ClassifierThresholds;
use crate::error::{Error, Result};
use crate::mapping::{DenseLut, Mapping};
use crate::stats::{linear_regression, pearson, safe_ln, Regression};

/// Upper bound (exclusive) of the dark band: 25% of full scale.
pub const DARK_LIMIT: f64 = 0.25 * u16::MAX as f64;
/// Lower bound (exclusive) of the bright band: 75% of full scale.
pub const BRIGHT_LIMIT: f64 = 0.75 * u16::MAX as f64;

/// Least-squares line over the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LinearFitResult {
    /// R² in [0, 1].
    pub linearity: f64,
    pub slope: f64,
    pub intercept: f64,
}

impl From<Regression> for LinearFitResult {
    fn from(r: Regression) -> Self {
        Self {
            linearity: r.r_squared,
            slope: r.slope,
            intercept: r.intercept,
        }
    }
}

/// Fit a line through the mapping's `(original, aggregated target)` pairs.
pub fn fit_linear(mapping: &Mapping) -> LinearFitResult {
    let (xs, ys) = mapping.columns();
    linear_regression(&xs, &ys).into()
}

/// Transfer-function class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferClass {
    LinearTranslation,
    LinearAmplification,
    LinearAttenuation,
    ApproximatelyLinear,
    GammaLike,
    ContrastEnhancement,
    ComplexNonLinear,
}

impl TransferClass {
    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            TransferClass::LinearTranslation => "linear translation",
            TransferClass::LinearAmplification => "linear amplification",
            TransferClass::LinearAttenuation => "linear attenuation",
            TransferClass::ApproximatelyLinear => "approximately linear",
            TransferClass::GammaLike => "gamma-like",
            TransferClass::ContrastEnhancement => "contrast enhancement (S-curve)",
            TransferClass::ComplexNonLinear => "complex non-linear",
        }
    }

    /// One of the three strictly linear classes.
    pub fn is_linear(&self) -> bool {
        matches!(
            self,
            TransferClass::LinearTranslation
                | TransferClass::LinearAmplification
                | TransferClass::LinearAttenuation
        )
    }
}

impl fmt::Display for TransferClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Mean delta of the keys in one brightness band.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BandEffect {
    /// Observed keys in the band.
    pub keys: usize,
    /// Mean `target - original` over those keys, 0 without keys.
    pub mean_delta: f64,
}

/// Dark / mid / bright band effects.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BandEffects {
    pub dark: BandEffect,
    pub mid: BandEffect,
    pub bright: BandEffect,
}

/// Slopes of the lower and upper half of the sorted keys.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SegmentSlopes {
    pub lower: f64,
    pub upper: f64,
    /// First original value of the upper half.
    pub pivot: u16,
}

/// Parameters inferred for the detected class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimatedParameters {
    /// `target = slope * original + intercept`
    Linear { slope: f64, intercept: f64 },
    /// Every key shifted by the same amount.
    Offset { offset: i32 },
    /// `target / 65535 = (original / 65535)^exponent`
    Gamma { exponent: f64 },
    /// Two-slope stretch around `pivot`.
    ContrastStretch {
        lower_slope: f64,
        upper_slope: f64,
        pivot: u16,
    },
    /// No closed form; only the range change is known.
    Unknown { dynamic_range: f64 },
}

/// Everything the classifier derives from a mapping and its LUT.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub class: TransferClass,
    pub fit: LinearFitResult,
    /// Pearson correlation of `ln(original)` vs `ln(target)` over positive pairs.
    pub log_log_correlation: f64,
    pub segments: SegmentSlopes,
    pub bands: BandEffects,
    /// `(max(LUT) - min(LUT)) / 65535`.
    pub dynamic_range: f64,
    /// Exponent estimated from the key nearest mid-range, 1.0 if undefined.
    pub gamma: f64,
    /// Set when every observed key has the same delta.
    pub constant_offset: Option<i32>,
    pub distribution: MappingDistribution,
    /// Many keys map to widely spread targets.
    pub local_contrast: bool,
    pub parameters: EstimatedParameters,
    /// Heuristic confidence in [0, 1].
    pub confidence: f64,
}

impl Classification {
    /// Serialize as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Classify a mapping.
///
/// # Arguments
/// * `mapping` - Sparse mapping, at least one key
/// * `lut` - Dense table built from the same mapping
/// * `thresholds` - Decision table thresholds
///
/// # Returns
/// `EmptyMapping` when the mapping has no keys.
pub fn classify(
    mapping: &Mapping,
    lut: &DenseLut,
    thresholds: &ClassifierThresholds,
) -> Result<Classification> {
    if mapping.is_empty() {
        return Err(Error::EmptyMapping("nothing to classify"));
    }

    let fit = fit_linear(mapping);
    let log_log_correlation = log_log_correlation(mapping);
    let segments = segment_slopes(mapping);
    let class = decide(&fit, log_log_correlation, &segments, thresholds);

    let distribution = mapping_distribution(mapping);
    let local_contrast = is_local_contrast(
        &distribution,
        thresholds.local_contrast_fraction,
        thresholds.local_contrast_spread,
    );
    let constant_offset = constant_offset(mapping);
    let gamma = estimate_gamma(mapping);
    let dynamic_range = lut.dynamic_range();

    let parameters = match (class, constant_offset) {
        (TransferClass::LinearTranslation, Some(offset)) => EstimatedParameters::Offset { offset },
        (c, _) if c.is_linear() || c == TransferClass::ApproximatelyLinear => {
            EstimatedParameters::Linear {
                slope: fit.slope,
                intercept: fit.intercept,
            }
        }
        (TransferClass::GammaLike, _) => EstimatedParameters::Gamma { exponent: gamma },
        (TransferClass::ContrastEnhancement, _) => EstimatedParameters::ContrastStretch {
            lower_slope: segments.lower,
            upper_slope: segments.upper,
            pivot: segments.pivot,
        },
        _ => EstimatedParameters::Unknown { dynamic_range },
    };

    let confidence = match parameters {
        EstimatedParameters::Offset { .. } => 1.0,
        EstimatedParameters::Linear { .. } => fit.linearity,
        EstimatedParameters::Gamma { .. } => log_log_correlation.abs(),
        EstimatedParameters::ContrastStretch { .. } => 0.8,
        EstimatedParameters::Unknown { .. } => 0.5,
    };

    debug!(
        class = class.label(),
        linearity = fit.linearity,
        slope = fit.slope,
        log_log = log_log_correlation,
        local_contrast,
        "mapping classified"
    );

    Ok(Classification {
        class,
        fit,
        log_log_correlation,
        segments,
        bands: band_effects(mapping),
        dynamic_range,
        gamma,
        constant_offset,
        distribution,
        local_contrast,
        parameters,
        confidence,
    })
}

fn decide(
    fit: &LinearFitResult,
    log_log: f64,
    segments: &SegmentSlopes,
    t: &ClassifierThresholds,
) -> TransferClass {
    if fit.linearity > t.linear {
        if (fit.slope - 1.0).abs() < t.unit_slope_tolerance {
            TransferClass::LinearTranslation
        } else if fit.slope > 1.0 {
            TransferClass::LinearAmplification
        } else {
            TransferClass::LinearAttenuation
        }
    } else if fit.linearity > t.approximately_linear {
        TransferClass::ApproximatelyLinear
    } else if log_log > t.gamma_correlation {
        TransferClass::GammaLike
    } else if segments.lower > t.contrast_segment_slope && segments.upper > t.contrast_segment_slope
    {
        TransferClass::ContrastEnhancement
    } else {
        TransferClass::ComplexNonLinear
    }
}

/// Pearson correlation in log-log space, 0 with fewer than two positive pairs.
pub fn log_log_correlation(mapping: &Mapping) -> f64 {
    let (lx, ly): (Vec<f64>, Vec<f64>) = mapping
        .entries()
        .iter()
        .filter_map(|e| Some((safe_ln(e.original as f64)?, safe_ln(e.target as f64)?)))
        .unzip();
    pearson(&lx, &ly)
}

/// Slopes of the lower and upper half of the sorted keys.
pub fn segment_slopes(mapping: &Mapping) -> SegmentSlopes {
    let (xs, ys) = mapping.columns();
    let mid = xs.len() / 2;
    if mid < 2 || xs.len() - mid < 2 {
        return SegmentSlopes::default();
    }
    SegmentSlopes {
        lower: linear_regression(&xs[..mid], &ys[..mid]).slope,
        upper: linear_regression(&xs[mid..], &ys[mid..]).slope,
        pivot: mapping.entries()[mid].original,
    }
}

/// Mean delta per brightness band.
pub fn band_effects(mapping: &Mapping) -> BandEffects {
    let mut sums = [0i64; 3];
    let mut keys = [0usize; 3];
    for e in mapping.entries() {
        let o = e.original as f64;
        let band = if o < DARK_LIMIT {
            0
        } else if o > BRIGHT_LIMIT {
            2
        } else {
            1
        };
        sums[band] += e.delta() as i64;
        keys[band] += 1;
    }
    let effect = |i: usize| BandEffect {
        keys: keys[i],
        mean_delta: if keys[i] == 0 {
            0.0
        } else {
            sums[i] as f64 / keys[i] as f64
        },
    };
    BandEffects {
        dark: effect(0),
        mid: effect(1),
        bright: effect(2),
    }
}

/// `ln(t / 65535) / ln(o / 65535)` at the key nearest mid-range.
///
/// Falls back to 1.0 when either log is zero or undefined.
pub fn estimate_gamma(mapping: &Mapping) -> f64 {
    const MID: f64 = u16::MAX as f64 / 2.0;
    let Some(entry) = mapping
        .entries()
        .iter()
        .min_by(|a, b| {
            (a.original as f64 - MID)
                .abs()
                .total_cmp(&(b.original as f64 - MID).abs())
        })
    else {
        return 1.0;
    };

    let full = u16::MAX as f64;
    match (
        safe_ln(entry.original as f64 / full),
        safe_ln(entry.target as f64 / full),
    ) {
        (Some(lo), Some(lt)) if lo != 0.0 && lt != 0.0 => {
            let g = lt / lo;
            if g.is_finite() && g > 0.0 {
                g
            } else {
                1.0
            }
        }
        _ => 1.0,
    }
}

/// The shared delta when every key moved by the same amount.
pub fn constant_offset(mapping: &Mapping) -> Option<i32> {
    let mut entries = mapping.entries().iter();
    let first = entries.next()?;
    if first.is_one_to_many() {
        return None;
    }
    let delta = first.delta();
    entries
        .all(|e| e.delta() == delta && !e.is_one_to_many())
        .then_some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::densify;
    use crate::stats::gamma_transform;

    fn run(mapping: &Mapping) -> Classification {
        let lut = densify(mapping).unwrap();
        classify(mapping, &lut, &ClassifierThresholds::default()).unwrap()
    }

    #[test]
    fn test_translation_with_offset() {
        let mapping = Mapping::from_pairs((0..1000u16).map(|x| (x * 10, x * 10 + 500)));
        let c = run(&mapping);

        assert_eq!(c.class, TransferClass::LinearTranslation);
        assert_eq!(c.constant_offset, Some(500));
        assert_eq!(c.parameters, EstimatedParameters::Offset { offset: 500 });
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_amplification() {
        let mapping = Mapping::from_pairs((0..1000u16).map(|x| (x * 30, x * 60 + 100)));
        let c = run(&mapping);

        assert_eq!(c.class, TransferClass::LinearAmplification);
        match c.parameters {
            EstimatedParameters::Linear { slope, intercept } => {
                assert!((slope - 2.0).abs() < 1e-9);
                assert!((intercept - 100.0).abs() < 1e-6);
            }
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_attenuation() {
        let mapping = Mapping::from_pairs((0..1000u16).map(|x| (x * 60, x * 30)));
        assert_eq!(run(&mapping).class, TransferClass::LinearAttenuation);
    }

    #[test]
    fn test_gamma_like() {
        // Strong gamma bends the curve enough to fail the linear rows
        let mapping = Mapping::from_pairs((1..=255u16).map(|v| {
            let o = v * 257;
            (o, gamma_transform(o, 0.2))
        }));
        let c = run(&mapping);

        assert_eq!(c.class, TransferClass::GammaLike);
        match c.parameters {
            EstimatedParameters::Gamma { exponent } => assert!((exponent - 5.0).abs() < 0.05),
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_complex() {
        // Alternating high/low targets
        let mapping =
            Mapping::from_pairs((0..2000u16).map(|x| (x * 30, if x % 2 == 0 { 60000 } else { 100 })));
        let c = run(&mapping);
        assert_eq!(c.class, TransferClass::ComplexNonLinear);
        assert_eq!(c.confidence, 0.5);
    }

    #[test]
    fn test_decision_table_contrast_row() {
        let fit = LinearFitResult {
            linearity: 0.5,
            slope: 1.5,
            intercept: 0.0,
        };
        let segments = SegmentSlopes {
            lower: 1.3,
            upper: 1.4,
            pivot: 30000,
        };
        let t = ClassifierThresholds::default();
        assert_eq!(
            decide(&fit, 0.1, &segments, &t),
            TransferClass::ContrastEnhancement
        );
        assert_eq!(decide(&fit, 0.95, &segments, &t), TransferClass::GammaLike);
        let approx = LinearFitResult {
            linearity: 0.9,
            ..fit
        };
        assert_eq!(
            decide(&approx, 0.95, &segments, &t),
            TransferClass::ApproximatelyLinear
        );
    }

    #[test]
    fn test_band_effects() {
        let mapping = Mapping::from_pairs([(1000, 1100), (3000, 3300), (30000, 30000), (60000, 59000)]);
        let bands = band_effects(&mapping);

        assert_eq!(bands.dark.keys, 2);
        assert_eq!(bands.dark.mean_delta, 200.0);
        assert_eq!(bands.mid.mean_delta, 0.0);
        assert_eq!(bands.bright.mean_delta, -1000.0);
    }

    #[test]
    fn test_gamma_fallback() {
        assert_eq!(estimate_gamma(&Mapping::from_pairs([(0, 100)])), 1.0);
        assert_eq!(estimate_gamma(&Mapping::from_pairs([(30000, 0)])), 1.0);
        assert_eq!(estimate_gamma(&Mapping::from_pairs([(65535, 1000)])), 1.0);
    }

    #[test]
    fn test_empty_mapping_rejected() {
        let lut = DenseLut::identity();
        let err = classify(&Mapping::default(), &lut, &ClassifierThresholds::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyMapping(_)));
    }

    #[test]
    fn test_to_json() {
        let mapping = Mapping::from_pairs((0..100u16).map(|x| (x * 100, x * 100)));
        let json = run(&mapping).to_json().unwrap();
        assert!(json.contains("\"class\":\"linear_translation\""));
        assert!(json.contains("\"kind\":\"offset\""));
    }
}
