//! End-to-end tests of the mapping and inference pipeline.
//!
//! Covers:
//! - Exhaustive sampling order and coverage
//! - Gap-filling and LUT completeness
//! - Linear round trips through a recorded rule
//! - Classification of simple synthetic transforms
//! - Statistics on extreme inputs

use std::collections::HashSet;
use std::time::Duration;

use lutscope::classify::fit_linear;
use lutscope::mapping::LUT_SIZE;
use lutscope::stats::{RunningStats, SafeSum};
use lutscope::{
    analyze, apply_rule, build_mapping, classify, densify, extract_samples, generate_report,
    AggregateKind, AnalysisConfig, EstimatedParameters, ImageSet, Mapping, ProcessingRule,
    RunControl, SampleMode, TransferClass, Transform,
};
use ndarray::Array2;

fn ramp(width: usize, height: usize, scale: usize) -> Array2<u16> {
    Array2::from_shape_fn((height, width), |(y, x)| ((y * width + x) * scale) as u16)
}

// ============================================================================
// Sampling
// ============================================================================

#[test]
fn test_exhaustive_samples_cover_every_pixel_in_order() {
    let original = ramp(13, 7, 11);
    let target = original.mapv(|v| v / 3);
    let images = ImageSet::new(original.view(), target.view()).unwrap();

    let samples = extract_samples(&images, SampleMode::Exhaustive, &RunControl::unattended()).unwrap();

    assert_eq!(samples.len(), 13 * 7);
    let positions: HashSet<(u32, u32)> = samples.iter().map(|s| (s.x, s.y)).collect();
    assert_eq!(positions.len(), samples.len());
    for (i, s) in samples.iter().enumerate() {
        assert_eq!(s.y as usize, i / 13);
        assert_eq!(s.x as usize, i % 13);
        assert_eq!(s.original, original[[s.y as usize, s.x as usize]]);
        assert_eq!(s.target, target[[s.y as usize, s.x as usize]]);
    }
}

#[test]
fn test_grid_sampling_rate() {
    let original = ramp(100, 100, 1);
    let images = ImageSet::new(original.view(), original.view()).unwrap();
    let mode = SampleMode::from_rate(0.1).unwrap();

    let samples = extract_samples(&images, mode, &RunControl::unattended()).unwrap();

    assert_eq!(samples.len() as u64, mode.sample_count(100, 100));
    assert!(samples.len() < 10_000);
}

// ============================================================================
// Mapping
// ============================================================================

#[test]
fn test_gap_filling_midpoint() {
    let mapping = Mapping::from_pairs([(10_000, 20_000), (40_000, 30_000)]);
    let lut = densify(&mapping).unwrap();

    assert_eq!(lut.as_slice().len(), LUT_SIZE);
    assert!((lut.get(25_000) as i32 - 25_000).abs() <= 1);
    assert_eq!(lut.get(0), 20_000);
    assert_eq!(lut.get(65_535), 30_000);
}

#[test]
fn test_lut_is_complete_for_sparse_mapping() {
    let original = ramp(4, 4, 4000);
    let target = original.mapv(|v| v / 2);
    let images = ImageSet::new(original.view(), target.view()).unwrap();
    let samples = extract_samples(&images, SampleMode::Exhaustive, &RunControl::unattended()).unwrap();

    let mapping = build_mapping(&samples, AggregateKind::Median);
    let lut = densify(&mapping).unwrap();

    assert_eq!(mapping.len(), 16);
    assert_eq!(lut.as_slice().len(), LUT_SIZE);
    for entry in mapping.entries() {
        assert_eq!(lut.get(entry.original), entry.target);
    }
}

// ============================================================================
// Rules
// ============================================================================

#[test]
fn test_linear_round_trip() {
    let original = ramp(100, 100, 3);
    let target = original.mapv(|v| v * 2 + 100);
    let images = ImageSet::new(original.view(), target.view()).unwrap();
    let samples = extract_samples(&images, SampleMode::Exhaustive, &RunControl::unattended()).unwrap();

    let mapping = build_mapping(&samples, AggregateKind::Mean);
    let lut = densify(&mapping).unwrap();
    let fit = fit_linear(&mapping);
    assert!((fit.slope - 2.0).abs() < 1e-9);
    assert!((fit.intercept - 100.0).abs() < 1e-6);

    let mut rule = ProcessingRule::new("observed", Transform::lut(mapping, lut));
    let replayed = apply_rule(original.view(), &mut rule, &RunControl::unattended()).unwrap();
    assert_eq!(replayed, target);

    let mut linear = ProcessingRule::new("formula", Transform::Linear { slope: 2.0, intercept: 100.0 });
    let formula = apply_rule(original.view(), &mut linear, &RunControl::unattended()).unwrap();
    assert_eq!(formula, target);
}

#[test]
fn test_rule_application_is_idempotent() {
    let original = ramp(32, 32, 50);
    let mut rule = ProcessingRule::new("gamma", Transform::Math(lutscope::rules::MathOp::Gamma { gamma: 2.2 }))
        .with_details(8);

    let first = apply_rule(original.view(), &mut rule, &RunControl::unattended()).unwrap();
    let mut stats_first = rule.statistics.clone().unwrap();
    let second = apply_rule(original.view(), &mut rule, &RunControl::unattended()).unwrap();
    let mut stats_second = rule.statistics.clone().unwrap();

    stats_first.elapsed = Duration::ZERO;
    stats_second.elapsed = Duration::ZERO;
    assert_eq!(first, second);
    assert_eq!(stats_first, stats_second);
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn test_halved_image_is_linear_attenuation() {
    let original = ramp(4, 4, 4000);
    let target = original.mapv(|v| v / 2);

    let outcome = analyze(original.view(), target.view(), &AnalysisConfig::default()).unwrap();

    assert_eq!(outcome.classification.class, TransferClass::LinearAttenuation);
    assert!((outcome.classification.fit.slope - 0.5).abs() < 1e-3);
    assert!(outcome.classification.confidence > 0.9);
}

#[test]
fn test_constant_offset_is_translation() {
    let original = ramp(50, 20, 10);
    let target = original.mapv(|v| v + 250);
    let images = ImageSet::new(original.view(), target.view()).unwrap();
    let samples = extract_samples(&images, SampleMode::Exhaustive, &RunControl::unattended()).unwrap();
    let mapping = build_mapping(&samples, AggregateKind::Mean);
    let lut = densify(&mapping).unwrap();

    let c = classify(&mapping, &lut, &Default::default()).unwrap();

    assert_eq!(c.class, TransferClass::LinearTranslation);
    assert_eq!(c.parameters, EstimatedParameters::Offset { offset: 250 });
    assert_eq!(c.confidence, 1.0);
}

#[test]
fn test_report_names_inferred_algorithm() {
    let original = ramp(64, 16, 60);
    let target = original.mapv(|v| v / 4 + 1000);

    let outcome = analyze(original.view(), target.view(), &AnalysisConfig::default()).unwrap();
    let report = generate_report(std::slice::from_ref(&outcome.rule), &AnalysisConfig::default());

    assert_eq!(report, outcome.report);
    assert!(report.contains("## 3. Algorithm Inference"));
    assert!(report.contains("linear attenuation"));
    assert!(report.contains("**Suggested algorithm**"));
}

// ============================================================================
// Numeric robustness
// ============================================================================

#[test]
fn test_extreme_deltas_stay_finite() {
    let mut stats = RunningStats::new();
    let mut sum = SafeSum::new();
    for i in 0..10_000_000u64 {
        let delta = if i % 2 == 0 { 65_535.0 } else { -65_535.0 };
        stats.push(delta);
        sum.add(65_535);
    }

    assert_eq!(stats.count(), 10_000_000);
    assert!(stats.mean().is_finite());
    assert!(stats.mean().abs() < 1.0);
    let sd = stats.std_dev();
    assert!(sd.value.is_finite());
    assert!((sd.value - 65_535.0).abs() < 1.0);
    let mean = sum.mean();
    assert!(mean.value.is_finite());
    assert!((mean.value - 65_535.0).abs() < 1e-6);
}

#[test]
fn test_full_scale_lut_on_ten_megapixel_zero_image() {
    let image = Array2::<u16>::zeros((2500, 4000));
    let lut = densify(&Mapping::from_pairs([(0, 65_535)])).unwrap();
    let mut rule = ProcessingRule::new("max out", Transform::lut(Mapping::default(), lut));

    let out = apply_rule(image.view(), &mut rule, &RunControl::unattended()).unwrap();

    assert!(out.iter().all(|&v| v == 65_535));
    let stats = rule.statistics.as_ref().unwrap();
    assert_eq!(stats.processed_count, 10_000_000);
    assert!(stats.average_change.is_finite());
    assert!(stats.change_std_dev.is_finite());
    assert_eq!(stats.average_change, 65_535.0);
    assert_eq!(stats.change_std_dev, 0.0);
    assert_eq!((stats.min_change, stats.max_change), (65_535, 65_535));
    assert_eq!(stats.before_mean, 0.0);
    assert!((stats.after_mean - 65_535.0).abs() < 1e-9);
    assert!(!stats.saturated);
}
