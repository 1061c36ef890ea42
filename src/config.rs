//! Tunable parameters for mapping analysis.
//!
//! Configuration can be loaded from JSON files or constructed in code:
//!
//! ```no_run
//! use lutscope::AnalysisConfig;
//! use std::path::Path;
//!
//! let config = AnalysisConfig::from_json_file(Path::new("analysis.json"))?;
//! let defaults = AnalysisConfig::default();
//! # Ok::<(), lutscope::Error>(())
//! ```
//!
//! Every field has a default, so partial JSON documents are accepted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mapping::AggregateKind;
use crate::report::ExportFormat;
use crate::sampling::SampleMode;

/// Complete configuration for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// How multiple target values sharing an original value are reduced.
    pub aggregate: AggregateKind,

    /// Exhaustive scan or grid preview.
    pub sampling: SampleMode,

    /// Progress cadence in per-mille of the stage total (1 = every 0.1%).
    pub progress_interval_permille: u32,

    /// Samples kept from each end of the scan for reporting.
    pub detail_cap: usize,

    /// Report settings.
    pub report: ReportConfig,

    /// Classification thresholds.
    pub thresholds: ClassifierThresholds,

    /// Stream every sample to this file while scanning.
    pub export: Option<ExportTarget>,

    /// Scan rows in parallel. Progress and cancellation are still per row.
    pub parallel: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            aggregate: AggregateKind::Mean,
            sampling: SampleMode::Exhaustive,
            progress_interval_permille: 1,
            detail_cap: 1000,
            report: ReportConfig::default(),
            thresholds: ClassifierThresholds::default(),
            export: None,
            parallel: false,
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json_str(&contents)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Save configuration as pretty-printed JSON.
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| Error::io(path, e))
    }
}

/// Report generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Evenly spaced mapping points listed per LUT step.
    pub mapping_sample_points: usize,

    /// First/last samples listed in the detail section.
    pub detail_lines: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            mapping_sample_points: 32,
            detail_lines: 10,
        }
    }
}

/// Thresholds of the transfer-function decision table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// Linearity above which the mapping counts as linear.
    pub linear: f64,
    /// Linearity above which the mapping counts as approximately linear.
    pub approximately_linear: f64,
    /// Allowed |slope - 1| for a pure translation.
    pub unit_slope_tolerance: f64,
    /// Log-log correlation above which the mapping counts as gamma-like.
    pub gamma_correlation: f64,
    /// Minimum slope of both halves for a contrast stretch.
    pub contrast_segment_slope: f64,
    /// Share of one-to-many keys above which processing looks position dependent.
    pub local_contrast_fraction: f64,
    /// Mean within-key target spread (16-bit levels) required as well.
    pub local_contrast_spread: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            linear: 0.95,
            approximately_linear: 0.8,
            unit_slope_tolerance: 0.1,
            gamma_correlation: 0.9,
            contrast_segment_slope: 1.2,
            local_contrast_fraction: 0.5,
            local_contrast_spread: 256.0,
        }
    }
}

/// Destination for the full-fidelity sample export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTarget {
    /// Output file.
    pub path: PathBuf,
    /// Tabular or text lines.
    pub format: ExportFormat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.aggregate, AggregateKind::Mean);
        assert_eq!(config.sampling, SampleMode::Exhaustive);
        assert_eq!(config.progress_interval_permille, 1);
        assert!((config.thresholds.linear - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            AnalysisConfig::from_json_str(r#"{ "aggregate": "majority", "detail_cap": 5 }"#)
                .unwrap();

        assert_eq!(config.aggregate, AggregateKind::Majority);
        assert_eq!(config.detail_cap, 5);
        assert_eq!(config.report, ReportConfig::default());
    }

    #[test]
    fn test_grid_sampling_from_json() {
        let config =
            AnalysisConfig::from_json_str(r#"{ "sampling": { "grid": { "step": 4 } } }"#).unwrap();
        assert_eq!(config.sampling, SampleMode::Grid { step: 4 });
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = AnalysisConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("analysis.json");

        let mut config = AnalysisConfig::default();
        config.aggregate = AggregateKind::Median;
        config.export = Some(ExportTarget {
            path: dir.path().join("samples.csv"),
            format: ExportFormat::Tabular,
        });
        config.to_json_file(&path).unwrap();

        let loaded = AnalysisConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AnalysisConfig::from_json_file(Path::new("/nonexistent/analysis.json"))
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
