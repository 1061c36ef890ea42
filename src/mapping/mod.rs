//! Mapping aggregation and densification.
//!
//! Samples are reduced per original value to a sparse [`Mapping`]
//! (mean, lower median or majority vote), which [`densify`] turns into a
//! 65536-entry [`DenseLut`] by linear gap-filling.

pub mod aggregate;
pub mod table;

pub use aggregate::{build_mapping, build_mapping_from_images, AggregateKind, MappingAccumulator};
pub use table::{densify, DenseLut, Mapping, MappingEntry, LUT_SIZE};
