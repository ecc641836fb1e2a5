//! The capability interface every model family implements.
//!
//! The engine never looks inside a model: it only trains it on a slice of the
//! dataset and asks the fitted artifact for predictions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::data::ProblemType;
use crate::errors::ModelError;
use crate::params::Parameters;

/// Output of [`FittedModel::predict_proba`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prediction {
    /// One row per sample, one column per class.
    Probabilities(Vec<Vec<f64>>),
    /// One value per sample.
    Values(Vec<f64>),
}

impl Prediction {
    pub fn len(&self) -> usize {
        match self {
            Self::Probabilities(rows) => rows.len(),
            Self::Values(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of probability columns, `None` for value predictions.
    pub fn n_columns(&self) -> Option<usize> {
        match self {
            Self::Probabilities(rows) => rows.first().map(Vec::len),
            Self::Values(_) => None,
        }
    }

    /// Short shape description used in error messages.
    pub fn shape(&self) -> String {
        match self {
            Self::Probabilities(rows) => {
                format!("probabilities {}x{}", rows.len(), self.n_columns().unwrap_or(0))
            }
            Self::Values(values) => format!("values {}", values.len()),
        }
    }

    /// Weighted element-wise average. Returns `None` when the inputs are
    /// empty, differ in kind or shape, or the weights do not line up.
    pub fn weighted_mean(predictions: &[&Prediction], weights: &[f64]) -> Option<Prediction> {
        let first = predictions.first()?;
        if predictions.len() != weights.len() {
            return None;
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return None;
        }

        match first {
            Prediction::Values(values) => {
                let mut out = vec![0.0; values.len()];
                for (prediction, w) in predictions.iter().zip(weights) {
                    let Prediction::Values(values) = prediction else {
                        return None;
                    };
                    if values.len() != out.len() {
                        return None;
                    }
                    for (acc, v) in out.iter_mut().zip(values) {
                        *acc += w * v;
                    }
                }
                out.iter_mut().for_each(|v| *v /= total);
                Some(Prediction::Values(out))
            }
            Prediction::Probabilities(rows) => {
                let cols = first.n_columns().unwrap_or(0);
                let mut out = vec![vec![0.0; cols]; rows.len()];
                for (prediction, w) in predictions.iter().zip(weights) {
                    let Prediction::Probabilities(rows) = prediction else {
                        return None;
                    };
                    if rows.len() != out.len() {
                        return None;
                    }
                    for (acc_row, row) in out.iter_mut().zip(rows) {
                        if row.len() != cols {
                            return None;
                        }
                        for (acc, p) in acc_row.iter_mut().zip(row) {
                            *acc += w * p;
                        }
                    }
                }
                for row in &mut out {
                    row.iter_mut().for_each(|p| *p /= total);
                }
                Some(Prediction::Probabilities(out))
            }
        }
    }

    /// Unweighted element-wise average.
    pub fn mean(predictions: &[&Prediction]) -> Option<Prediction> {
        Self::weighted_mean(predictions, &vec![1.0; predictions.len()])
    }
}

/// A trained artifact able to predict on new rows.
pub trait FittedModel: Send + Sync {
    /// Probability matrix for classification, values for regression.
    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Prediction, ModelError>;
}

/// A model family: trains a fresh artifact from a parameter assignment.
pub trait ModelFamily: Send + Sync {
    /// Human-readable family name.
    fn name(&self) -> &str;

    /// Whether this family can be used for the given problem type.
    fn supports(&self, _problem_type: ProblemType) -> bool {
        true
    }

    fn fit(
        &self,
        parameters: &Parameters,
        features: &[Vec<f64>],
        target: &[f64],
    ) -> Result<Arc<dyn FittedModel>, ModelError>;
}

impl fmt::Debug for dyn ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelFamily({})", self.name())
    }
}

impl fmt::Debug for dyn FittedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FittedModel")
    }
}
