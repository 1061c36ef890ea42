//! lutscope
//!
//! Infers the intensity transfer function between a 16-bit original image
//! and its processed counterpart, and describes the algorithm that most
//! likely produced it.
//!
//! ## Pipeline
//! 1. **sampling**: co-located original/target samples, exhaustive or on a grid
//! 2. **mapping**: per-value aggregation (mean, median, majority) and gap-filling
//!    into a 65536-entry lookup table
//! 3. **classify**: linearity, gamma and contrast detection, band effects,
//!    closed-form model fits and piecewise segmentation
//! 4. **rules**: the table (or a parametric transform) as a re-applicable rule
//!    with before/after statistics
//! 5. **report**: text report with an algorithm suggestion, full sample export
//!
//! [`task`] runs the whole pipeline on a worker thread with progress events
//! and cancellation.
//!
//! ## Image Format
//! Single-channel `u16` rasters as `ndarray` views of shape `(height, width)`.
//! Raw buffers are validated through [`image::gray16_view`].
//!
//! ```
//! use lutscope::{analyze, AnalysisConfig, TransferClass};
//! use ndarray::Array2;
//!
//! let original = Array2::from_shape_fn((4, 4), |(y, x)| ((y * 4 + x) * 1000) as u16);
//! let target = original.mapv(|v| v / 2);
//! let outcome = analyze(original.view(), target.view(), &AnalysisConfig::default())?;
//! assert_eq!(outcome.classification.class, TransferClass::LinearAttenuation);
//! # Ok::<(), lutscope::Error>(())
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod image;
pub mod mapping;
pub mod progress;
pub mod report;
pub mod rules;
pub mod sampling;
pub mod stats;
pub mod task;

#[cfg(feature = "wasm")]
pub mod wasm;

pub use classify::{classify, Classification, EstimatedParameters, TransferClass};
pub use config::AnalysisConfig;
pub use error::{Error, Result};
pub use image::{gray16_view, RasterLayout, Region};
pub use mapping::{build_mapping, densify, AggregateKind, DenseLut, Mapping};
pub use progress::{CancelToken, NoProgress, ProgressSink, ProgressState, RunControl, Stop};
pub use report::{export_full_sample_data, generate_report, ExportFormat};
pub use rules::{apply_rule, ProcessingRule, Transform};
pub use sampling::{extract_samples, ImageSet, Sample, SampleMode};
pub use task::{analyze, run_analysis, spawn_analysis, AnalysisHandle, AnalysisOutcome, TaskEvent};

// Python bindings (only when python feature is enabled)
#[cfg(feature = "python")]
mod python {
    use ndarray::Axis;
    use numpy::{IntoPyArray, PyArray1, PyArray3, PyReadonlyArray1, PyReadonlyArray3};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;

    use crate::image::single_channel;
    use crate::{
        analyze, apply_rule, build_mapping, densify, extract_samples, AggregateKind,
        AnalysisConfig, DenseLut, Error, ImageSet, Mapping, ProcessingRule, RunControl,
        SampleMode, Transform,
    };

    impl From<Error> for PyErr {
        fn from(err: Error) -> PyErr {
            match err {
                Error::Cancelled(_) | Error::Worker(_) => PyRuntimeError::new_err(err.to_string()),
                _ => PyValueError::new_err(err.to_string()),
            }
        }
    }

    fn parse_config(config_json: Option<&str>) -> PyResult<AnalysisConfig> {
        match config_json {
            Some(json) => Ok(AnalysisConfig::from_json_str(json)?),
            None => Ok(AnalysisConfig::default()),
        }
    }

    fn parse_aggregate(name: &str) -> PyResult<AggregateKind> {
        match name {
            "mean" => Ok(AggregateKind::Mean),
            "median" => Ok(AggregateKind::Median),
            "majority" => Ok(AggregateKind::Majority),
            other => Err(PyValueError::new_err(format!("unknown aggregate '{}'", other))),
        }
    }

    // ========================================================================
    // Mapping
    // ========================================================================

    /// Build the 65536-entry lookup table mapping `original` to `target`.
    ///
    /// # Arguments
    /// * `original` - (height, width, 1) u16 image
    /// * `target` - Processed image, same shape
    /// * `aggregate` - "mean", "median" or "majority"
    #[pyfunction]
    #[pyo3(signature = (original, target, aggregate="mean"))]
    pub fn build_lut<'py>(
        py: Python<'py>,
        original: PyReadonlyArray3<'py, u16>,
        target: PyReadonlyArray3<'py, u16>,
        aggregate: &str,
    ) -> PyResult<Bound<'py, PyArray1<u16>>> {
        let kind = parse_aggregate(aggregate)?;
        let original = single_channel(original.as_array())?;
        let target = single_channel(target.as_array())?;

        let lut = py.allow_threads(|| -> crate::Result<DenseLut> {
            let images = ImageSet::new(original, target)?;
            let samples = extract_samples(&images, SampleMode::Exhaustive, &RunControl::unattended())?;
            densify(&build_mapping(&samples, kind))
        })?;
        Ok(PyArray1::from_slice(py, lut.as_slice()))
    }

    /// Apply a 65536-entry lookup table to a (height, width, 1) u16 image.
    #[pyfunction]
    pub fn apply_lut<'py>(
        py: Python<'py>,
        image: PyReadonlyArray3<'py, u16>,
        lut: PyReadonlyArray1<'py, u16>,
    ) -> PyResult<Bound<'py, PyArray3<u16>>> {
        let lut = DenseLut::from_vec(lut.as_array().to_vec())?;
        let image = single_channel(image.as_array())?;

        let mut rule = ProcessingRule::new("lut", Transform::lut(Mapping::default(), lut));
        let output = py.allow_threads(|| apply_rule(image, &mut rule, &RunControl::unattended()))?;
        Ok(output.insert_axis(Axis(2)).into_pyarray(py))
    }

    // ========================================================================
    // Inference
    // ========================================================================

    /// Classify the transfer function; returns the classification as JSON.
    ///
    /// # Arguments
    /// * `config_json` - Optional analysis configuration as a JSON string
    #[pyfunction]
    #[pyo3(signature = (original, target, config_json=None))]
    pub fn classify<'py>(
        py: Python<'py>,
        original: PyReadonlyArray3<'py, u16>,
        target: PyReadonlyArray3<'py, u16>,
        config_json: Option<&str>,
    ) -> PyResult<String> {
        let config = parse_config(config_json)?;
        let original = single_channel(original.as_array())?;
        let target = single_channel(target.as_array())?;

        let outcome = py.allow_threads(|| analyze(original, target, &config))?;
        Ok(outcome.classification.to_json()?)
    }

    /// Run the full analysis and return the text report.
    #[pyfunction]
    #[pyo3(signature = (original, target, config_json=None))]
    pub fn report<'py>(
        py: Python<'py>,
        original: PyReadonlyArray3<'py, u16>,
        target: PyReadonlyArray3<'py, u16>,
        config_json: Option<&str>,
    ) -> PyResult<String> {
        let config = parse_config(config_json)?;
        let original = single_channel(original.as_array())?;
        let target = single_channel(target.as_array())?;

        let outcome = py.allow_threads(|| analyze(original, target, &config))?;
        Ok(outcome.report)
    }

    /// Python module definition
    #[pymodule]
    pub fn lutscope(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(build_lut, m)?)?;
        m.add_function(wrap_pyfunction!(apply_lut, m)?)?;
        m.add_function(wrap_pyfunction!(classify, m)?)?;
        m.add_function(wrap_pyfunction!(report, m)?)?;
        Ok(())
    }
}

#[cfg(feature = "python")]
pub use python::lutscope;
