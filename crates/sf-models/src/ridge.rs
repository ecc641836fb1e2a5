//! Ridge regression solved in closed form on standardized features.

use sf_types::{FittedModel, ModelError, ModelFamily, Parameters, Prediction, ProblemType};
use std::sync::Arc;

use crate::preprocess::{invalid, Standardizer};

/// Ridge regression family. Parameter: `alpha` (L2 strength, default 1.0).
#[derive(Debug, Clone, Copy, Default)]
pub struct RidgeRegression;

impl ModelFamily for RidgeRegression {
    fn name(&self) -> &str {
        "ridge_regression"
    }

    fn supports(&self, problem_type: ProblemType) -> bool {
        problem_type == ProblemType::Regression
    }

    fn fit(
        &self,
        parameters: &Parameters,
        features: &[Vec<f64>],
        target: &[f64],
    ) -> Result<Arc<dyn FittedModel>, ModelError> {
        let alpha = parameters.f64_or("alpha", 1.0).map_err(invalid)?;
        if alpha < 0.0 || !alpha.is_finite() {
            return Err(ModelError::InvalidParameter {
                parameter: "alpha".into(),
                message: format!("must be a non-negative number, got {alpha}"),
            });
        }

        let scaler = Standardizer::fit(features)?;
        let x = scaler.transform(features)?;
        let d = scaler.width();
        let intercept = target.iter().sum::<f64>() / target.len() as f64;

        // normal equations: (XᵀX + αI) w = Xᵀ(y - ȳ)
        let mut a = vec![vec![0.0; d]; d];
        let mut b = vec![0.0; d];
        for (row, y) in x.iter().zip(target) {
            let centered = y - intercept;
            for i in 0..d {
                b[i] += row[i] * centered;
                for j in 0..d {
                    a[i][j] += row[i] * row[j];
                }
            }
        }
        for (i, a_row) in a.iter_mut().enumerate() {
            a_row[i] += alpha;
        }

        let coefficients = solve(a, b).ok_or_else(|| ModelError::NotConverged {
            message: "singular system; increase alpha".into(),
        })?;

        Ok(Arc::new(FittedRidge {
            scaler,
            coefficients,
            intercept,
        }))
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

struct FittedRidge {
    scaler: Standardizer,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl FittedModel for FittedRidge {
    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Prediction, ModelError> {
        let x = self.scaler.transform(features)?;
        let values = x
            .iter()
            .map(|row| {
                self.intercept
                    + row
                        .iter()
                        .zip(&self.coefficients)
                        .map(|(xi, wi)| xi * wi)
                        .sum::<f64>()
            })
            .collect();
        Ok(Prediction::Values(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_linear_relation() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| 3.0 * r[0] - 2.0 * r[1] + 1.0).collect();
        let mut p = Parameters::new();
        p.insert("alpha", 0.0);
        let model = RidgeRegression.fit(&p, &x, &y).unwrap();
        let Prediction::Values(pred) = model.predict_proba(&x).unwrap() else {
            panic!("expected values");
        };
        for (p, t) in pred.iter().zip(&y) {
            assert!((p - t).abs() < 1e-6, "{p} vs {t}");
        }
    }

    #[test]
    fn singular_without_regularization() {
        // duplicated column
        let x: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64, i as f64]).collect();
        let y: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let mut p = Parameters::new();
        p.insert("alpha", 0.0);
        assert!(matches!(
            RidgeRegression.fit(&p, &x, &y).err(),
            Some(ModelError::NotConverged { .. })
        ));
        p.set("alpha", 1.0).unwrap();
        assert!(RidgeRegression.fit(&p, &x, &y).is_ok());
    }

    #[test]
    fn solve_small_system() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let x = solve(a, vec![3.0, 5.0]).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }
}
