//! Markdown-style analysis report.

use std::fmt::Write as _;

use crate::classify::{
    best_model, classify, fit_models, piecewise_fit, BandEffect, Classification,
    EstimatedParameters, PiecewiseOptions, TransferClass,
};
use crate::config::AnalysisConfig;
use crate::mapping::Mapping;
use crate::rules::{LutTransform, ProcessingRule, RuleKind, RuleParameters, Transform};

/// Mean deltas below this many levels read as "unchanged".
const UNCHANGED_DELTA: f64 = 1.0;

/// Confidence tier used for the recommendations section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.9 {
            ConfidenceTier::High
        } else if confidence > 0.7 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        }
    }
}

/// Render the report for a sequence of applied rules.
///
/// Sections: processing steps, per-step details (parameters, mapping
/// samples, statistics), inference for the last direct-mapping step, and
/// recommendations.
pub fn generate_report(rules: &[ProcessingRule], config: &AnalysisConfig) -> String {
    let mut out = String::new();
    // Writing into a String never fails.
    let _ = render(&mut out, rules, config);
    out
}

fn render(out: &mut String, rules: &[ProcessingRule], config: &AnalysisConfig) -> std::fmt::Result {
    writeln!(out, "# Transfer Function Analysis Report")?;
    writeln!(out)?;

    // 1. Steps
    writeln!(out, "## 1. Processing Steps")?;
    writeln!(out)?;
    if rules.is_empty() {
        writeln!(out, "No processing steps recorded.")?;
    }
    for (i, rule) in rules.iter().enumerate() {
        writeln!(out, "{}. **{}** ({}) [id {}]", i + 1, rule.name, kind_label(rule), rule.id)?;
    }
    writeln!(out)?;

    // 2. Details
    writeln!(out, "## 2. Step Details")?;
    for (i, rule) in rules.iter().enumerate() {
        writeln!(out)?;
        writeln!(out, "### Step {}: {}", i + 1, rule.name)?;
        writeln!(out)?;
        write_step(out, rule, config)?;
    }
    writeln!(out)?;

    // 3 and 4. Inference and recommendations
    let last_lut = rules.iter().rev().find_map(|r| match &r.transform {
        Some(Transform::Lut(t)) => Some(t.as_ref()),
        _ => None,
    });
    match last_lut.and_then(|t| classify(&t.mapping, &t.lut, &config.thresholds).ok().map(|c| (t, c))) {
        Some((lut, classification)) => {
            write_inference(out, lut, &classification)?;
            write_recommendations(out, &classification)?;
        }
        None => {
            writeln!(out, "## 3. Algorithm Inference")?;
            writeln!(out)?;
            writeln!(out, "No direct mapping step with observed values; nothing to infer.")?;
        }
    }
    Ok(())
}

fn kind_label(rule: &ProcessingRule) -> &'static str {
    match rule.kind() {
        Some(RuleKind::DirectMapping) => "direct mapping",
        Some(RuleKind::MathOperation) => "math operation",
        None => "no transform",
    }
}

fn write_step(out: &mut String, rule: &ProcessingRule, config: &AnalysisConfig) -> std::fmt::Result {
    match rule.region {
        Some(r) => writeln!(out, "- Region: {},{} {}x{}", r.x, r.y, r.width, r.height)?,
        None => writeln!(out, "- Region: whole image")?,
    }

    match rule.parameters() {
        Some(RuleParameters::DirectMapping {
            keys,
            samples,
            min_output,
            max_output,
        }) => {
            writeln!(out, "- Observed values: {} ({} samples)", keys, samples)?;
            writeln!(out, "- Output range: {} to {}", min_output, max_output)?;
        }
        Some(RuleParameters::Linear { slope, intercept }) => {
            writeln!(out, "- Formula: target = {:.4} × original {:+.2}", slope, intercept)?;
        }
        Some(RuleParameters::Math(op)) => writeln!(out, "- Operation: {:?}", op)?,
        None => writeln!(out, "- Transform: not set")?,
    }

    if let Some(Transform::Lut(t)) = &rule.transform {
        write_mapping_summary(out, &t.mapping, config.report.mapping_sample_points)?;
    }

    match &rule.statistics {
        Some(s) => {
            writeln!(out)?;
            writeln!(out, "**Statistics**")?;
            writeln!(out)?;
            writeln!(out, "- Pixels processed: {}", s.processed_count)?;
            writeln!(out, "- Average change: {:.2}", s.average_change)?;
            writeln!(out, "- Change range: {} to {}", s.min_change, s.max_change)?;
            writeln!(out, "- Change std dev: {:.2}", s.change_std_dev)?;
            writeln!(out, "- Mean before / after: {:.2} / {:.2}", s.before_mean, s.after_mean)?;
            writeln!(out, "- Elapsed: {:.1} ms", s.elapsed.as_secs_f64() * 1000.0)?;
            if s.saturated {
                writeln!(out, "- Note: values are approximate (a sum reached its ceiling)")?;
            }
        }
        None => writeln!(out, "- Not applied yet")?,
    }

    if let Some(details) = &rule.pixel_details {
        let shown = details.len().min(config.report.detail_lines);
        if shown > 0 {
            writeln!(out)?;
            writeln!(out, "**First {} pixels**", shown)?;
            writeln!(out)?;
            for s in &details[..shown] {
                writeln!(
                    out,
                    "- ({},{}) {} → {} ({:+})",
                    s.x,
                    s.y,
                    s.original,
                    s.target,
                    s.delta()
                )?;
            }
        }
    }
    Ok(())
}

/// Evenly spaced mapping points plus delta extremes.
fn write_mapping_summary(out: &mut String, mapping: &Mapping, points: usize) -> std::fmt::Result {
    let entries = mapping.entries();
    if entries.is_empty() {
        return writeln!(out, "- Mapping: empty");
    }

    let deltas = entries.iter().map(|e| e.delta());
    let min = deltas.clone().min().unwrap_or(0);
    let max = deltas.clone().max().unwrap_or(0);
    let mean = deltas.map(|d| d as f64).sum::<f64>() / entries.len() as f64;
    writeln!(out, "- Delta over observed values: min {}, max {}, mean {:.2}", min, max, mean)?;

    writeln!(out)?;
    writeln!(out, "| original | target | delta | samples |")?;
    writeln!(out, "|---:|---:|---:|---:|")?;
    for i in spaced_indices(entries.len(), points) {
        let e = &entries[i];
        writeln!(out, "| {} | {} | {:+} | {} |", e.original, e.target, e.delta(), e.count)?;
    }
    Ok(())
}

/// Up to `points` indices spread evenly over `0..len`, including both ends.
pub(crate) fn spaced_indices(len: usize, points: usize) -> Vec<usize> {
    if len == 0 || points == 0 {
        return Vec::new();
    }
    if points >= len {
        return (0..len).collect();
    }
    if points == 1 {
        return vec![0];
    }
    let mut idx: Vec<usize> = (0..points)
        .map(|i| i * (len - 1) / (points - 1))
        .collect();
    idx.dedup();
    idx
}

fn describe_band(name: &str, band: &BandEffect) -> String {
    if band.keys == 0 {
        return format!("{}: no observed values", name);
    }
    let effect = if band.mean_delta.abs() < UNCHANGED_DELTA {
        "unchanged".to_string()
    } else if band.mean_delta > 0.0 {
        format!("brightened by {:.1} on average", band.mean_delta)
    } else {
        format!("darkened by {:.1} on average", -band.mean_delta)
    };
    format!("{}: {}", name, effect)
}

fn write_inference(out: &mut String, lut: &LutTransform, c: &Classification) -> std::fmt::Result {
    writeln!(out, "## 3. Algorithm Inference")?;
    writeln!(out)?;
    writeln!(out, "- **Classification**: {}", c.class)?;
    writeln!(
        out,
        "- **Confidence**: {:.3} ({})",
        c.confidence,
        ConfidenceTier::from_confidence(c.confidence).label()
    )?;
    writeln!(
        out,
        "- **Linear fit**: target = {:.4} × original {:+.2} (R² {:.4})",
        c.fit.slope, c.fit.intercept, c.fit.linearity
    )?;
    writeln!(out, "- **Log-log correlation**: {:.4}", c.log_log_correlation)?;
    writeln!(out, "- **Dynamic range**: {:.1}% of full scale", c.dynamic_range * 100.0)?;
    writeln!(out, "- {}", describe_band("Dark tones", &c.bands.dark))?;
    writeln!(out, "- {}", describe_band("Mid tones", &c.bands.mid))?;
    writeln!(out, "- {}", describe_band("Bright tones", &c.bands.bright))?;
    writeln!(
        out,
        "- **Mapping**: {} one-to-one, {} one-to-many values (mean spread {:.1})",
        c.distribution.one_to_one, c.distribution.one_to_many, c.distribution.mean_spread
    )?;

    let fits = fit_models(&lut.mapping);
    if let Some(best) = best_model(&fits) {
        writeln!(
            out,
            "- **Best closed form**: {} `{}` (R² {:.4})",
            best.model.name(),
            best.model,
            best.r_squared
        )?;
    }

    let pieces = piecewise_fit(&lut.mapping, &PiecewiseOptions::default());
    if pieces.is_piecewise() {
        writeln!(out, "- **Piecewise linear**: {} segments", pieces.segments.len())?;
        for seg in &pieces.segments {
            writeln!(
                out,
                "  - {} to {}: slope {:.4}, intercept {:+.2} (R² {:.4})",
                seg.start_value, seg.end_value, seg.fit.slope, seg.fit.intercept, seg.fit.r_squared
            )?;
        }
    }

    writeln!(out)?;
    writeln!(out, "**Suggested algorithm**")?;
    writeln!(out)?;
    writeln!(out, "{}", suggestion(c))?;
    writeln!(out)?;
    Ok(())
}

/// Natural-language suggestion with estimated parameter ranges.
pub fn suggestion(c: &Classification) -> String {
    if c.local_contrast {
        return format!(
            "The same input value maps to widely different outputs ({:.0}% of values, mean \
             spread {:.0} levels), so the output depends on pixel neighbourhoods. This points \
             to a local contrast method such as Retinex or adaptive histogram equalization; a \
             single global curve will not reproduce it.",
            c.distribution.one_to_many_fraction() * 100.0,
            c.distribution.mean_spread
        );
    }

    // Uncertainty shrinks as the fit improves
    let slack = (1.0 - c.confidence).clamp(0.01, 0.5);
    match c.parameters {
        EstimatedParameters::Offset { offset } => format!(
            "A constant offset: target = original {:+}. Implement as an addition with clamping \
             to [0, 65535].",
            offset
        ),
        EstimatedParameters::Linear { slope, intercept } => {
            let ds = (slope.abs() * slack).max(0.001);
            let di = (intercept.abs() * slack).max(1.0);
            format!(
                "A {} transform: target = a × original + b with a in [{:.4}, {:.4}] and b in \
                 [{:.1}, {:.1}].",
                c.class,
                slope - ds,
                slope + ds,
                intercept - di,
                intercept + di
            )
        }
        EstimatedParameters::Gamma { exponent } => {
            let lo = exponent * (1.0 - slack);
            let hi = exponent * (1.0 + slack);
            format!(
                "Gamma correction on normalized values: target = 65535 × (original / 65535)^p \
                 with p in [{:.3}, {:.3}] (display gamma about {:.3}).",
                lo,
                hi,
                1.0 / exponent
            )
        }
        EstimatedParameters::ContrastStretch {
            lower_slope,
            upper_slope,
            pivot,
        } => format!(
            "A contrast stretch around {}: slope about {:.3} below and {:.3} above. An S-curve \
             or sigmoid with its midpoint near {} is a good starting point.",
            pivot, lower_slope, upper_slope, pivot
        ),
        EstimatedParameters::Unknown { dynamic_range } => {
            let direction = if dynamic_range > 1.0 - 1e-9 {
                "keeps the full output range"
            } else {
                "compresses the output range"
            };
            format!(
                "No simple closed form fits ({}; it {}). Use the recorded lookup table \
                 directly, or fit a piecewise curve.",
                TransferClass::ComplexNonLinear,
                direction
            )
        }
    }
}

fn write_recommendations(out: &mut String, c: &Classification) -> std::fmt::Result {
    let tier = ConfidenceTier::from_confidence(c.confidence);
    writeln!(out, "## 4. Recommendations")?;
    writeln!(out)?;
    writeln!(out, "### {} confidence", capitalize(tier.label()))?;
    writeln!(out)?;
    match tier {
        ConfidenceTier::High => {
            writeln!(out, "- The inferred formula can be implemented directly")?;
            writeln!(out, "- Verify behaviour at the range limits (0 and 65535)")?;
        }
        ConfidenceTier::Medium => {
            writeln!(out, "- Validate the inferred formula on more images")?;
            writeln!(out, "- Compare against the lookup table on a held-out image")?;
        }
        ConfidenceTier::Low => {
            writeln!(out, "- Collect more image pairs before trusting an inferred formula")?;
            writeln!(out, "- Prefer the recorded lookup table over a closed form")?;
        }
    }
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::densify;
    use crate::progress::RunControl;
    use crate::rules::{apply_rule, MathOp};
    use ndarray::Array2;

    fn lut_rule(pairs: impl IntoIterator<Item = (u16, u16)>) -> ProcessingRule {
        let mapping = Mapping::from_pairs(pairs);
        let lut = densify(&mapping).unwrap();
        ProcessingRule::new("observed mapping", Transform::lut(mapping, lut))
    }

    #[test]
    fn test_spaced_indices() {
        assert_eq!(spaced_indices(10, 3), vec![0, 4, 9]);
        assert_eq!(spaced_indices(3, 10), vec![0, 1, 2]);
        assert_eq!(spaced_indices(5, 1), vec![0]);
        assert!(spaced_indices(0, 4).is_empty());
    }

    #[test]
    fn test_report_sections() {
        let mut rule = lut_rule((0..200u16).map(|x| (x * 100, x * 50)));
        let image = Array2::from_shape_fn((4, 4), |(y, x)| ((y * 4 + x) * 100) as u16);
        apply_rule(image.view(), &mut rule, &RunControl::unattended()).unwrap();

        let report = generate_report(&[rule], &AnalysisConfig::default());

        assert!(report.starts_with("# Transfer Function Analysis Report"));
        assert!(report.contains("## 1. Processing Steps"));
        assert!(report.contains("1. **observed mapping** (direct mapping)"));
        assert!(report.contains("## 2. Step Details"));
        assert!(report.contains("| original | target | delta | samples |"));
        assert!(report.contains("- Pixels processed: 16"));
        assert!(report.contains("- **Classification**: linear attenuation"));
        assert!(report.contains("## 4. Recommendations"));
        assert!(report.contains("### High confidence"));
    }

    #[test]
    fn test_mapping_sample_points_bounded() {
        let rule = lut_rule((0..1000u16).map(|x| (x, x)));
        let mut config = AnalysisConfig::default();
        config.report.mapping_sample_points = 5;

        let report = generate_report(&[rule], &config);
        let rows = report
            .lines()
            .filter(|l| l.starts_with("| ") && !l.starts_with("| original"))
            .count();
        assert_eq!(rows, 5);
        assert!(report.contains("- Not applied yet"));
    }

    #[test]
    fn test_report_without_lut() {
        let rule = ProcessingRule::new("add", Transform::Math(MathOp::Add { value: 5.0 }));
        let report = generate_report(&[rule], &AnalysisConfig::default());
        assert!(report.contains("(math operation)"));
        assert!(report.contains("nothing to infer"));
        assert!(!report.contains("## 4. Recommendations"));
    }

    #[test]
    fn test_empty_report() {
        let report = generate_report(&[], &AnalysisConfig::default());
        assert!(report.contains("No processing steps recorded."));
    }

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(ConfidenceTier::from_confidence(0.95), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_confidence(0.9), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_confidence(0.7), ConfidenceTier::Low);
    }

    #[test]
    fn test_band_description() {
        let band = BandEffect {
            keys: 3,
            mean_delta: -12.0,
        };
        assert_eq!(describe_band("Dark tones", &band), "Dark tones: darkened by 12.0 on average");
        assert_eq!(
            describe_band("Mid tones", &BandEffect::default()),
            "Mid tones: no observed values"
        );
    }
}
