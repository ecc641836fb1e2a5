//! Multinomial logistic regression trained by full-batch gradient descent.
//!
//! Parameters: `penalty` (`l1`/`l2`), `C` (inverse regularization strength),
//! `max_iter`, `solver`, `learning_rate`, `tol`, `random_state`. Every solver
//! name runs the same optimizer; the names only gate which penalties are
//! accepted, so `l1` with `newton-cg`, `lbfgs` or `sag` is rejected at fit time.

use sf_types::{FittedModel, ModelError, ModelFamily, Parameters, Prediction, ProblemType};
use std::sync::Arc;
use tracing::trace;

use crate::preprocess::{class_indices, invalid, softmax_in_place, Standardizer};

pub const SOLVERS: [&str; 5] = ["newton-cg", "lbfgs", "liblinear", "sag", "saga"];
const L2_ONLY_SOLVERS: [&str; 3] = ["newton-cg", "lbfgs", "sag"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Penalty {
    L1,
    L2,
}

#[derive(Debug, Clone, PartialEq)]
struct Settings {
    penalty: Penalty,
    c: f64,
    max_iter: usize,
    learning_rate: f64,
    tol: f64,
}

impl Settings {
    fn from_parameters(parameters: &Parameters) -> Result<Self, ModelError> {
        let solver = parameters.str_or("solver", "lbfgs").map_err(invalid)?;
        if !SOLVERS.contains(&solver) {
            return Err(ModelError::InvalidParameter {
                parameter: "solver".into(),
                message: format!("unknown solver '{solver}'"),
            });
        }

        let penalty = match parameters.str_or("penalty", "l2").map_err(invalid)? {
            "l1" => Penalty::L1,
            "l2" => Penalty::L2,
            other => {
                return Err(ModelError::InvalidParameter {
                    parameter: "penalty".into(),
                    message: format!("unknown penalty '{other}'"),
                })
            }
        };
        if penalty == Penalty::L1 && L2_ONLY_SOLVERS.contains(&solver) {
            return Err(ModelError::InvalidParameter {
                parameter: "penalty".into(),
                message: format!("solver '{solver}' supports only 'l2' penalties, got 'l1'"),
            });
        }

        let c = parameters.f64_or("C", 1.0).map_err(invalid)?;
        if c <= 0.0 {
            return Err(ModelError::InvalidParameter {
                parameter: "C".into(),
                message: format!("must be positive, got {c}"),
            });
        }

        let max_iter = parameters.i64_or("max_iter", 100).map_err(invalid)?;
        if max_iter < 1 {
            return Err(ModelError::InvalidParameter {
                parameter: "max_iter".into(),
                message: format!("must be at least 1, got {max_iter}"),
            });
        }

        let learning_rate = parameters.f64_or("learning_rate", 0.5).map_err(invalid)?;
        if learning_rate <= 0.0 {
            return Err(ModelError::InvalidParameter {
                parameter: "learning_rate".into(),
                message: format!("must be positive, got {learning_rate}"),
            });
        }

        Ok(Self {
            penalty,
            c,
            max_iter: max_iter as usize,
            learning_rate,
            tol: parameters.f64_or("tol", 1e-6).map_err(invalid)?,
        })
    }
}

/// Logistic regression model family (classification only).
#[derive(Debug, Clone, Copy, Default)]
pub struct LogisticRegression;

impl ModelFamily for LogisticRegression {
    fn name(&self) -> &str {
        "logistic_regression"
    }

    fn supports(&self, problem_type: ProblemType) -> bool {
        problem_type == ProblemType::Classification
    }

    fn fit(
        &self,
        parameters: &Parameters,
        features: &[Vec<f64>],
        target: &[f64],
    ) -> Result<Arc<dyn FittedModel>, ModelError> {
        let settings = Settings::from_parameters(parameters)?;
        let (labels, n_classes) = class_indices(target)?;
        let scaler = Standardizer::fit(features)?;
        let x = scaler.transform(features)?;

        let n = x.len() as f64;
        let d = scaler.width();
        // bias stored in the last column
        let mut weights = vec![vec![0.0; d + 1]; n_classes];
        let mut grad = vec![vec![0.0; d + 1]; n_classes];
        let mut scores = vec![0.0; n_classes];
        let reg = 1.0 / (settings.c * n);

        let mut iterations = 0;
        for _ in 0..settings.max_iter {
            iterations += 1;
            grad.iter_mut().for_each(|g| g.iter_mut().for_each(|v| *v = 0.0));

            for (row, &label) in x.iter().zip(&labels) {
                linear_scores(&weights, row, &mut scores);
                softmax_in_place(&mut scores);
                for (class, g) in grad.iter_mut().enumerate() {
                    let err = scores[class] - if class == label { 1.0 } else { 0.0 };
                    for (gj, xj) in g.iter_mut().zip(row) {
                        *gj += err * xj;
                    }
                    g[d] += err;
                }
            }

            let mut max_grad: f64 = 0.0;
            for (w, g) in weights.iter_mut().zip(&mut grad) {
                for j in 0..=d {
                    g[j] /= n;
                    if settings.penalty == Penalty::L2 && j < d {
                        g[j] += reg * w[j];
                    }
                    max_grad = max_grad.max(g[j].abs());
                    w[j] -= settings.learning_rate * g[j];
                }
                if settings.penalty == Penalty::L1 {
                    let threshold = settings.learning_rate * reg;
                    for wj in w.iter_mut().take(d) {
                        *wj = wj.signum() * (wj.abs() - threshold).max(0.0);
                    }
                }
            }

            if max_grad < settings.tol {
                break;
            }
        }

        if weights.iter().flatten().any(|w| !w.is_finite()) {
            return Err(ModelError::NotConverged {
                message: "weights diverged; lower the learning rate".into(),
            });
        }
        trace!(iterations, n_classes, "logistic regression fitted");

        Ok(Arc::new(FittedLogistic { scaler, weights }))
    }
}

fn linear_scores(weights: &[Vec<f64>], row: &[f64], out: &mut [f64]) {
    let d = row.len();
    for (score, w) in out.iter_mut().zip(weights) {
        *score = w[d] + w.iter().zip(row).map(|(wj, xj)| wj * xj).sum::<f64>();
    }
}

struct FittedLogistic {
    scaler: Standardizer,
    weights: Vec<Vec<f64>>,
}

impl FittedModel for FittedLogistic {
    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Prediction, ModelError> {
        let x = self.scaler.transform(features)?;
        let mut scores = vec![0.0; self.weights.len()];
        let rows = x
            .iter()
            .map(|row| {
                linear_scores(&self.weights, row, &mut scores);
                softmax_in_place(&mut scores);
                scores.clone()
            })
            .collect();
        Ok(Prediction::Probabilities(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..20 {
            let t = i as f64 / 10.0;
            x.push(vec![-2.0 - t, 0.5 * t]);
            y.push(0.0);
            x.push(vec![2.0 + t, -0.5 * t]);
            y.push(1.0);
        }
        (x, y)
    }

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        let mut p = Parameters::new();
        for (k, v) in pairs {
            p.insert(*k, *v);
        }
        p
    }

    #[test]
    fn learns_separable_classes() {
        let (x, y) = separable();
        let model = LogisticRegression.fit(&Parameters::new(), &x, &y).unwrap();
        let Prediction::Probabilities(rows) = model.predict_proba(&x).unwrap() else {
            panic!("expected probabilities");
        };
        for (row, label) in rows.iter().zip(&y) {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            let predicted = if row[1] > row[0] { 1.0 } else { 0.0 };
            assert_eq!(predicted, *label);
        }
    }

    #[test]
    fn rejects_l1_with_l2_only_solvers() {
        let (x, y) = separable();
        for solver in L2_ONLY_SOLVERS {
            let err = LogisticRegression
                .fit(&params(&[("penalty", "l1"), ("solver", solver)]), &x, &y)
                .err()
                .unwrap();
            assert!(matches!(err, ModelError::InvalidParameter { ref parameter, .. } if parameter == "penalty"));
        }
        assert!(LogisticRegression
            .fit(&params(&[("penalty", "l1"), ("solver", "saga")]), &x, &y)
            .is_ok());
    }

    #[test]
    fn rejects_unknown_solver_and_bad_c() {
        let (x, y) = separable();
        assert!(LogisticRegression
            .fit(&params(&[("solver", "adam")]), &x, &y)
            .is_err());
        let mut p = Parameters::new();
        p.insert("C", 0.0);
        assert!(LogisticRegression.fit(&p, &x, &y).is_err());
    }

    #[test]
    fn three_classes() {
        let x = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![5.0, 5.0],
            vec![5.1, 5.0],
            vec![-5.0, 5.0],
            vec![-5.1, 5.0],
        ];
        let y = vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0];
        let mut p = Parameters::new();
        p.insert("max_iter", 300i64);
        let model = LogisticRegression.fit(&p, &x, &y).unwrap();
        let prediction = model.predict_proba(&x).unwrap();
        assert_eq!(prediction.n_columns(), Some(3));
    }

    #[test]
    fn predict_checks_width() {
        let (x, y) = separable();
        let model = LogisticRegression.fit(&Parameters::new(), &x, &y).unwrap();
        assert!(matches!(
            model.predict_proba(&[vec![1.0, 2.0, 3.0]]),
            Err(ModelError::FeatureMismatch { .. })
        ));
    }

    #[test]
    fn classification_only() {
        assert!(LogisticRegression.supports(ProblemType::Classification));
        assert!(!LogisticRegression.supports(ProblemType::Regression));
    }
}
