//! Processing rules.
//!
//! A [`ProcessingRule`] wraps a [`Transform`] (dense LUT, linear or
//! parametric math) with an optional region. [`apply_rule`] writes into a
//! fresh buffer and records [`ProcessingStatistics`] on the rule.

pub mod rule;
pub mod transform;

pub use rule::{apply_rule, ProcessingRule, ProcessingStatistics, RuleHistory};
pub use transform::{LutTransform, MathOp, RuleKind, RuleParameters, Transform};
