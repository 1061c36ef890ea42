//! Sample extraction.
//!
//! Walks co-registered original/target (and optional enhanced) rasters and
//! yields one [`Sample`] per visited pixel, row-major from the top-left.
//!
//! ## Modes
//!
//! - **Exhaustive**: every pixel
//! - **Grid**: every `step`-th pixel in both axes; [`SampleMode::from_rate`]
//!   converts a sampling rate into a step

pub mod sample;
pub mod scan;

pub use sample::{ImageSet, Sample, SampleMode};
pub use scan::{extract_samples, scan_samples, scan_samples_as, SampleLog, SampleStream, SCAN_STAGE};
