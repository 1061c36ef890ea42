//! Transfer-function classification and algorithm inference.
//!
//! ## Contents
//!
//! - **transfer**: linear fit, decision table, band effects, gamma estimate
//! - **distribution**: one-to-one vs one-to-many keys, per-band position profile
//! - **piecewise**: sliding-window segmentation into linear pieces
//! - **models**: linear/quadratic/power/logarithmic/exponential fits
//! - **compare**: similarity of two fits

pub mod compare;
pub mod distribution;
pub mod models;
pub mod piecewise;
pub mod transfer;

pub use compare::{
    compare_fits, compare_mappings, compare_runs, ks_statistic, FitComparison, KsTest, RunComparator,
    RunComparison, ValueHistogram, KS_SIGNIFICANCE,
};
pub use distribution::{mapping_distribution, MappingDistribution, PositionProfile, RegionStats};
pub use models::{best_model, fit_models, Model, ModelFit};
pub use piecewise::{piecewise_fit, PiecewiseFit, PiecewiseOptions, Segment};
pub use transfer::{
    band_effects, classify, constant_offset, estimate_gamma, fit_linear, log_log_correlation,
    segment_slopes, BandEffect, BandEffects, Classification, EstimatedParameters,
    LinearFitResult, SegmentSlopes, TransferClass,
};
