use std::fmt;
use std::sync::Arc;

use crate::model::Prediction;

type ScoreFn = dyn Fn(&[f64], &Prediction) -> f64 + Send + Sync;

/// Caller-supplied scoring function: true labels and a prediction in, a
/// scalar out. Higher is better; must be deterministic.
#[derive(Clone)]
pub struct ScoreFunction {
    name: String,
    func: Arc<ScoreFn>,
}

impl ScoreFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[f64], &Prediction) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn score(&self, truth: &[f64], prediction: &Prediction) -> f64 {
        (self.func)(truth, prediction)
    }
}

impl fmt::Debug for ScoreFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoreFunction")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calls_wrapped_function() {
        let neg_mae = ScoreFunction::new("neg_mae", |truth, prediction| match prediction {
            Prediction::Values(values) => {
                -truth
                    .iter()
                    .zip(values)
                    .map(|(t, v)| (t - v).abs())
                    .sum::<f64>()
                    / truth.len() as f64
            }
            Prediction::Probabilities(_) => f64::NAN,
        });
        assert_eq!(neg_mae.name(), "neg_mae");
        let score = neg_mae.score(&[1.0, 2.0], &Prediction::Values(vec![1.5, 2.5]));
        assert!((score + 0.5).abs() < 1e-12);
        assert!(format!("{neg_mae:?}").contains("neg_mae"));
    }
}
