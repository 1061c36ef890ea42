//! WebAssembly exports.
//!
//! Rasters cross the boundary as flat row-major `u16` slices plus their
//! width and height. Structured results are returned as JSON strings.

use wasm_bindgen::prelude::*;

use crate::image::{gray16_view, RasterLayout};
use crate::mapping::{build_mapping_from_images, densify, AggregateKind, DenseLut, Mapping};
use crate::progress::RunControl;
use crate::rules::{apply_rule, ProcessingRule, Transform};
use crate::sampling::{ImageSet, SampleMode, SCAN_STAGE};
use crate::task::analyze;
use crate::{AnalysisConfig, Error};

fn to_js(err: Error) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn build(original: &[u16], target: &[u16], width: usize, height: usize) -> crate::Result<(Mapping, DenseLut)> {
    let layout = RasterLayout::gray16(width, height);
    let images = ImageSet::new(gray16_view(original, &layout)?, gray16_view(target, &layout)?)?;
    let mapping = build_mapping_from_images(
        &images,
        SampleMode::Exhaustive,
        AggregateKind::Mean,
        &RunControl::unattended(),
        false,
        SCAN_STAGE,
    )?;
    let lut = densify(&mapping)?;
    Ok((mapping, lut))
}

// ============================================================================
// Mapping
// ============================================================================

/// Build the 65536-entry lookup table from an original/target pair.
///
/// # Arguments
/// * `original` - Flat u16 samples (length = width * height)
/// * `target` - Processed samples, same length
/// * `width` - Image width in pixels
/// * `height` - Image height in pixels
#[wasm_bindgen]
pub fn build_lut_wasm(
    original: &[u16],
    target: &[u16],
    width: usize,
    height: usize,
) -> Result<Vec<u16>, JsValue> {
    let (_, lut) = build(original, target, width, height).map_err(to_js)?;
    Ok(lut.as_slice().to_vec())
}

/// Apply a 65536-entry lookup table to a flat u16 image.
#[wasm_bindgen]
pub fn apply_lut_wasm(
    data: &[u16],
    lut: &[u16],
    width: usize,
    height: usize,
) -> Result<Vec<u16>, JsValue> {
    let lut = DenseLut::from_vec(lut.to_vec()).map_err(to_js)?;
    let image = gray16_view(data, &RasterLayout::gray16(width, height)).map_err(to_js)?;
    let mut rule = ProcessingRule::new("lut", Transform::lut(Mapping::default(), lut));
    let output = apply_rule(image, &mut rule, &RunControl::unattended()).map_err(to_js)?;
    Ok(output.into_raw_vec_and_offset().0)
}

// ============================================================================
// Inference
// ============================================================================

/// Classify the transfer function; returns the classification as JSON.
#[wasm_bindgen]
pub fn classify_wasm(
    original: &[u16],
    target: &[u16],
    width: usize,
    height: usize,
) -> Result<String, JsValue> {
    let (mapping, lut) = build(original, target, width, height).map_err(to_js)?;
    let classification =
        crate::classify::classify(&mapping, &lut, &Default::default()).map_err(to_js)?;
    classification.to_json().map_err(to_js)
}

/// Run the full analysis and return the text report.
///
/// # Arguments
/// * `config_json` - Analysis configuration as JSON; empty for defaults
#[wasm_bindgen]
pub fn report_wasm(
    original: &[u16],
    target: &[u16],
    width: usize,
    height: usize,
    config_json: &str,
) -> Result<String, JsValue> {
    let config = if config_json.trim().is_empty() {
        AnalysisConfig::default()
    } else {
        AnalysisConfig::from_json_str(config_json).map_err(to_js)?
    };
    let layout = RasterLayout::gray16(width, height);
    let original = gray16_view(original, &layout).map_err(to_js)?;
    let target = gray16_view(target, &layout).map_err(to_js)?;
    let outcome = analyze(original, target, &config).map_err(to_js)?;
    Ok(outcome.report)
}
