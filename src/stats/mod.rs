//! Safe arithmetic kernel.
//!
//! Numeric primitives used throughout the engine. None of them panic and
//! none return NaN or infinity; reduced precision is disclosed through a
//! `saturated` flag rather than an error.
//!
//! ## Contents
//!
//! - **safe**: capped sums, guarded ratios, two-pass std-dev, power/log/gamma transforms
//! - **running**: mergeable Welford accumulator
//! - **regression**: least squares and Pearson correlation

pub mod regression;
pub mod running;
pub mod safe;

pub use regression::{linear_regression, pearson, Regression};
pub use running::RunningStats;
pub use safe::{
    clamp_to_u16, gamma_transform, log_transform, power_transform, safe_ln, safe_mean, safe_pow,
    safe_ratio, safe_std_dev, safe_variance, Estimate, SafeSum,
};
