//! Candidate closed-form models for a mapping, ranked by R².

use std::fmt;

use serde::Serialize;

use crate::mapping::Mapping;
use crate::stats::{linear_regression, safe_ln};

/// Fitted model with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Model {
    /// `y = slope * x + intercept`
    Linear { slope: f64, intercept: f64 },
    /// `y = a * x^2 + b * x + c`
    Quadratic { a: f64, b: f64, c: f64 },
    /// `y = scale * x^exponent`
    Power { scale: f64, exponent: f64 },
    /// `y = a * ln(x) + b`
    Logarithmic { a: f64, b: f64 },
    /// `y = exp(rate * x + offset)`
    Exponential { rate: f64, offset: f64 },
}

impl Model {
    /// Short model name.
    pub fn name(&self) -> &'static str {
        match self {
            Model::Linear { .. } => "linear",
            Model::Quadratic { .. } => "quadratic",
            Model::Power { .. } => "power",
            Model::Logarithmic { .. } => "logarithmic",
            Model::Exponential { .. } => "exponential",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Model::Linear { slope, intercept } => {
                write!(f, "y = {:.4}x {:+.2}", slope, intercept)
            }
            Model::Quadratic { a, b, c } => {
                write!(f, "y = {:.3e}x^2 {:+.4}x {:+.2}", a, b, c)
            }
            Model::Power { scale, exponent } => write!(f, "y = {:.4}x^{:.4}", scale, exponent),
            Model::Logarithmic { a, b } => write!(f, "y = {:.4}ln(x) {:+.2}", a, b),
            Model::Exponential { rate, offset } => {
                write!(f, "y = exp({:.3e}x {:+.4})", rate, offset)
            }
        }
    }
}

/// One model together with its goodness of fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelFit {
    pub model: Model,
    pub r_squared: f64,
}

/// Fit every model that is defined for the mapping's values.
///
/// Power, logarithmic and exponential models are fitted in log space and
/// skip non-positive values; their R² is that of the linearized fit. A model
/// with fewer than three usable keys is left out.
pub fn fit_models(mapping: &Mapping) -> Vec<ModelFit> {
    let (xs, ys) = mapping.columns();
    let mut fits = Vec::with_capacity(5);
    if xs.len() < 3 {
        return fits;
    }

    let linear = linear_regression(&xs, &ys);
    fits.push(ModelFit {
        model: Model::Linear {
            slope: linear.slope,
            intercept: linear.intercept,
        },
        r_squared: linear.r_squared,
    });

    if let Some(fit) = fit_quadratic(&xs, &ys) {
        fits.push(fit);
    }

    let log_pairs = |use_x: bool, use_y: bool| -> (Vec<f64>, Vec<f64>) {
        xs.iter()
            .zip(&ys)
            .filter_map(|(&x, &y)| {
                let lx = if use_x { safe_ln(x)? } else { x };
                let ly = if use_y { safe_ln(y)? } else { y };
                Some((lx, ly))
            })
            .unzip()
    };

    let (lx, ly) = log_pairs(true, true);
    if lx.len() >= 3 {
        let r = linear_regression(&lx, &ly);
        fits.push(ModelFit {
            model: Model::Power {
                scale: r.intercept.exp(),
                exponent: r.slope,
            },
            r_squared: r.r_squared,
        });
    }

    let (lx, y) = log_pairs(true, false);
    if lx.len() >= 3 {
        let r = linear_regression(&lx, &y);
        fits.push(ModelFit {
            model: Model::Logarithmic {
                a: r.slope,
                b: r.intercept,
            },
            r_squared: r.r_squared,
        });
    }

    let (x, ly) = log_pairs(false, true);
    if x.len() >= 3 {
        let r = linear_regression(&x, &ly);
        fits.push(ModelFit {
            model: Model::Exponential {
                rate: r.slope,
                offset: r.intercept,
            },
            r_squared: r.r_squared,
        });
    }

    fits.retain(|f| f.r_squared.is_finite());
    fits
}

/// R² differences below this count as ties.
const R_SQUARED_TIE: f64 = 1e-9;

/// Fit with the highest R². Ties go to the earlier (simpler) model.
pub fn best_model(fits: &[ModelFit]) -> Option<&ModelFit> {
    fits.iter()
        .fold(None, |best: Option<&ModelFit>, fit| match best {
            Some(b) if b.r_squared + R_SQUARED_TIE >= fit.r_squared => Some(b),
            _ => Some(fit),
        })
}

/// Least-squares parabola. `x` is mapped onto [0, 1] before solving.
fn fit_quadratic(xs: &[f64], ys: &[f64]) -> Option<ModelFit> {
    let x0 = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let x1 = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let scale = (x1 - x0).max(1.0);

    // Normal equations over powers of u = (x - x0) / scale
    let mut m = [[0.0f64; 4]; 3];
    for (&x, &y) in xs.iter().zip(ys) {
        let u = (x - x0) / scale;
        let powers = [1.0, u, u * u];
        for r in 0..3 {
            for c in 0..3 {
                m[r][c] += powers[r] * powers[c];
            }
            m[r][3] += powers[r] * y;
        }
    }
    let [c0, c1, c2] = solve3(m)?;

    let mean_y = ys.iter().sum::<f64>() / ys.len() as f64;
    let (mut ss_res, mut ss_tot) = (0.0, 0.0);
    for (&x, &y) in xs.iter().zip(ys) {
        let u = (x - x0) / scale;
        let pred = c0 + c1 * u + c2 * u * u;
        ss_res += (y - pred) * (y - pred);
        ss_tot += (y - mean_y) * (y - mean_y);
    }
    let r_squared = if ss_tot <= 1e-9 {
        if ss_res <= 1e-9 {
            1.0
        } else {
            0.0
        }
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    // Back to raw x
    let s2 = scale * scale;
    Some(ModelFit {
        model: Model::Quadratic {
            a: c2 / s2,
            b: c1 / scale - 2.0 * c2 * x0 / s2,
            c: c0 - c1 * x0 / scale + c2 * x0 * x0 / s2,
        },
        r_squared,
    })
}

/// Gaussian elimination with partial pivoting on an augmented 3x4 matrix.
fn solve3(mut m: [[f64; 4]; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        for row in col + 1..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let mut out = [0.0f64; 3];
    for row in (0..3).rev() {
        let mut acc = m[row][3];
        for k in row + 1..3 {
            acc -= m[row][k] * out[k];
        }
        out[row] = acc / m[row][row];
    }
    out.iter().all(|v| v.is_finite()).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(fits: &'a [ModelFit], name: &str) -> &'a ModelFit {
        fits.iter().find(|f| f.model.name() == name).unwrap()
    }

    #[test]
    fn test_linear_data_prefers_linear() {
        let mapping = Mapping::from_pairs((1..200u16).map(|x| (x * 100, x * 150 + 20)));
        let fits = fit_models(&mapping);

        assert_eq!(fits.len(), 5);
        let best = best_model(&fits).unwrap();
        assert!(best.r_squared > 0.999_999);
        assert!(matches!(best.model, Model::Linear { .. }));
    }

    #[test]
    fn test_quadratic_recovers_coefficients() {
        let mapping = Mapping::from_pairs((0..250u16).map(|x| {
            let xf = x as f64;
            (x, (0.5 * xf * xf + 3.0 * xf + 10.0).round() as u16)
        }));
        let fits = fit_models(&mapping);
        let quad = find(&fits, "quadratic");

        match quad.model {
            Model::Quadratic { a, b, c } => {
                assert!((a - 0.5).abs() < 1e-3);
                assert!((b - 3.0).abs() < 0.1);
                assert!((c - 10.0).abs() < 1.0);
            }
            _ => unreachable!(),
        }
        assert!(quad.r_squared > 0.9999);
    }

    #[test]
    fn test_power_fit_in_log_space() {
        let mapping = Mapping::from_pairs((1..=255u16).map(|x| {
            let t = 65535.0 * (x as f64 * 257.0 / 65535.0).powf(0.5);
            (x * 257, t.round() as u16)
        }));
        let fits = fit_models(&mapping);
        let power = find(&fits, "power");

        match power.model {
            Model::Power { exponent, .. } => assert!((exponent - 0.5).abs() < 1e-3),
            _ => unreachable!(),
        }
        assert!(power.r_squared > 0.9999);
    }

    #[test]
    fn test_zero_values_skip_log_models() {
        let mapping = Mapping::from_pairs([(0, 0), (1, 0), (2, 0), (3, 0)]);
        let fits = fit_models(&mapping);
        assert!(fits.iter().all(|f| !matches!(f.model, Model::Power { .. })));
        assert!(fits.iter().all(|f| !matches!(f.model, Model::Exponential { .. })));
    }

    #[test]
    fn test_too_few_points() {
        assert!(fit_models(&Mapping::from_pairs([(1, 2), (3, 4)])).is_empty());
        assert!(best_model(&[]).is_none());
    }

    #[test]
    fn test_display() {
        let m = Model::Linear {
            slope: 2.0,
            intercept: 100.0,
        };
        assert_eq!(m.to_string(), "y = 2.0000x +100.00");
    }
}
