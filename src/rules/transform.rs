//! Value transforms a processing rule can carry.
//!
//! Every transform maps a 16-bit value to a 16-bit value, so each one can
//! be tabulated once into a [`DenseLut`] and applied by lookup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::mapping::{DenseLut, Mapping, LUT_SIZE};
use crate::stats::{clamp_to_u16, gamma_transform, log_transform, power_transform, safe_ratio};

/// Rule category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Value-to-value lookup derived from observed samples.
    DirectMapping,
    /// Closed-form arithmetic.
    MathOperation,
}

/// Parametric arithmetic on a single value. Results are clamped to [0, 65535].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MathOp {
    Add { value: f64 },
    Subtract { value: f64 },
    Multiply { factor: f64 },
    /// Division by ~0 leaves the value unchanged.
    Divide { divisor: f64 },
    /// `v^exponent` on the raw value.
    Power { exponent: f64 },
    /// `gain * 65535 * ln(1 + v) / ln(65536)`.
    Log { gain: f64 },
    /// `(v / 65535)^(1 / gamma)`, rescaled.
    Gamma { gamma: f64 },
}

impl MathOp {
    /// Apply to one value.
    #[inline]
    pub fn apply(&self, value: u16) -> u16 {
        let v = value as f64;
        let fallback = |r: f64| if r.is_finite() { clamp_to_u16(r) } else { value };
        match *self {
            MathOp::Add { value: a } => fallback(v + a),
            MathOp::Subtract { value: s } => fallback(v - s),
            MathOp::Multiply { factor } => fallback(v * factor),
            MathOp::Divide { divisor } => clamp_to_u16(safe_ratio(v, divisor, v)),
            MathOp::Power { exponent } => power_transform(value, exponent),
            MathOp::Log { gain } => log_transform(value, gain),
            MathOp::Gamma { gamma } => gamma_transform(value, gamma),
        }
    }
}

/// A sparse mapping together with its gap-filled table.
#[derive(Debug, Clone, PartialEq)]
pub struct LutTransform {
    pub mapping: Mapping,
    pub lut: DenseLut,
}

/// What a rule does to each value.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// Table lookup. Shared so rules can be cloned cheaply.
    Lut(Arc<LutTransform>),
    /// `slope * v + intercept`.
    Linear { slope: f64, intercept: f64 },
    /// Parametric operation.
    Math(MathOp),
}

impl Transform {
    /// Table transform from a mapping and the LUT densified from it.
    pub fn lut(mapping: Mapping, lut: DenseLut) -> Self {
        Transform::Lut(Arc::new(LutTransform { mapping, lut }))
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Transform::Lut(_) => RuleKind::DirectMapping,
            Transform::Linear { .. } | Transform::Math(_) => RuleKind::MathOperation,
        }
    }

    /// Apply to one value.
    #[inline]
    pub fn apply(&self, value: u16) -> u16 {
        match self {
            Transform::Lut(t) => t.lut.get(value),
            Transform::Linear { slope, intercept } => {
                let r = slope * value as f64 + intercept;
                if r.is_finite() {
                    clamp_to_u16(r)
                } else {
                    value
                }
            }
            Transform::Math(op) => op.apply(value),
        }
    }

    /// Tabulate over all 65536 inputs.
    pub fn to_lut(&self) -> DenseLut {
        match self {
            Transform::Lut(t) => t.lut.clone(),
            _ => {
                let table: Vec<u16> = (0..LUT_SIZE).map(|v| self.apply(v as u16)).collect();
                DenseLut::from_vec(table).unwrap_or_else(|_| DenseLut::identity())
            }
        }
    }

    /// Serializable description of the transform.
    pub fn parameters(&self) -> RuleParameters {
        match self {
            Transform::Lut(t) => RuleParameters::DirectMapping {
                keys: t.mapping.len(),
                samples: t.mapping.sample_count(),
                min_output: t.lut.min(),
                max_output: t.lut.max(),
            },
            Transform::Linear { slope, intercept } => RuleParameters::Linear {
                slope: *slope,
                intercept: *intercept,
            },
            Transform::Math(op) => RuleParameters::Math(*op),
        }
    }
}

/// Tagged parameter summary, one variant per transform kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleParameters {
    DirectMapping {
        keys: usize,
        samples: u64,
        min_output: u16,
        max_output: u16,
    },
    Linear {
        slope: f64,
        intercept: f64,
    },
    Math(MathOp),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::densify;

    #[test]
    fn test_math_ops_clamp() {
        assert_eq!(MathOp::Add { value: 100.0 }.apply(65500), 65535);
        assert_eq!(MathOp::Subtract { value: 100.0 }.apply(50), 0);
        assert_eq!(MathOp::Multiply { factor: 0.5 }.apply(1001), 501);
        assert_eq!(MathOp::Multiply { factor: f64::NAN }.apply(7), 7);
        assert_eq!(MathOp::Divide { divisor: 4.0 }.apply(1000), 250);
        assert_eq!(MathOp::Divide { divisor: 0.0 }.apply(1000), 1000);
        assert_eq!(MathOp::Power { exponent: 2.0 }.apply(100), 10000);
        assert_eq!(MathOp::Gamma { gamma: 1.0 }.apply(4321), 4321);
        assert_eq!(MathOp::Log { gain: 1.0 }.apply(65535), 65535);
    }

    #[test]
    fn test_linear_transform() {
        let t = Transform::Linear {
            slope: 2.0,
            intercept: 100.0,
        };
        assert_eq!(t.apply(1000), 2100);
        assert_eq!(t.apply(40000), 65535);
        assert_eq!(t.kind(), RuleKind::MathOperation);
        assert_eq!(t.to_lut().get(10), 120);
    }

    #[test]
    fn test_lut_transform() {
        let mapping = Mapping::from_pairs([(0, 10), (100, 110)]);
        let lut = densify(&mapping).unwrap();
        let t = Transform::lut(mapping, lut);

        assert_eq!(t.kind(), RuleKind::DirectMapping);
        assert_eq!(t.apply(50), 60);
        match t.parameters() {
            RuleParameters::DirectMapping {
                keys,
                min_output,
                max_output,
                ..
            } => {
                assert_eq!(keys, 2);
                assert_eq!((min_output, max_output), (10, 110));
            }
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_math_op_serde_tagged() {
        let op: MathOp = serde_json::from_str(r#"{"op":"gamma","gamma":2.2}"#).unwrap();
        assert_eq!(op, MathOp::Gamma { gamma: 2.2 });
        let params = Transform::Math(op).parameters();
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"type\":\"math\""));
    }
}
