//! Brute-force k-nearest neighbours over standardized features.

use sf_types::{FittedModel, ModelError, ModelFamily, Parameters, Prediction, ProblemType};
use std::sync::Arc;

use crate::preprocess::{class_indices, invalid, Standardizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Weighting {
    Uniform,
    Distance,
}

/// k-nearest neighbours family. Parameters: `n_neighbors` (default 5),
/// `weights` (`uniform` or `distance`).
#[derive(Debug, Clone, Copy)]
pub struct KNearestNeighbors {
    problem_type: ProblemType,
}

impl KNearestNeighbors {
    pub fn classifier() -> Self {
        Self {
            problem_type: ProblemType::Classification,
        }
    }

    pub fn regressor() -> Self {
        Self {
            problem_type: ProblemType::Regression,
        }
    }
}

impl ModelFamily for KNearestNeighbors {
    fn name(&self) -> &str {
        match self.problem_type {
            ProblemType::Classification => "knn_classifier",
            ProblemType::Regression => "knn_regressor",
        }
    }

    fn supports(&self, problem_type: ProblemType) -> bool {
        problem_type == self.problem_type
    }

    fn fit(
        &self,
        parameters: &Parameters,
        features: &[Vec<f64>],
        target: &[f64],
    ) -> Result<Arc<dyn FittedModel>, ModelError> {
        let k = parameters.i64_or("n_neighbors", 5).map_err(invalid)?;
        if k < 1 {
            return Err(ModelError::InvalidParameter {
                parameter: "n_neighbors".into(),
                message: format!("must be at least 1, got {k}"),
            });
        }
        let weighting = match parameters.str_or("weights", "uniform").map_err(invalid)? {
            "uniform" => Weighting::Uniform,
            "distance" => Weighting::Distance,
            other => {
                return Err(ModelError::InvalidParameter {
                    parameter: "weights".into(),
                    message: format!("unknown weighting '{other}'"),
                })
            }
        };

        let n_classes = match self.problem_type {
            ProblemType::Classification => Some(class_indices(target)?.1),
            ProblemType::Regression => None,
        };

        let scaler = Standardizer::fit(features)?;
        let points = scaler.transform(features)?;
        Ok(Arc::new(FittedKnn {
            scaler,
            points,
            target: target.to_vec(),
            k: k as usize,
            weighting,
            n_classes,
        }))
    }
}

struct FittedKnn {
    scaler: Standardizer,
    points: Vec<Vec<f64>>,
    target: Vec<f64>,
    k: usize,
    weighting: Weighting,
    n_classes: Option<usize>,
}

impl FittedKnn {
    /// `(weight, target)` of the k nearest training points.
    fn neighbours(&self, query: &[f64]) -> Vec<(f64, f64)> {
        let mut distances: Vec<(f64, usize)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let d2: f64 = p.iter().zip(query).map(|(a, b)| (a - b) * (a - b)).sum();
                (d2.sqrt(), i)
            })
            .collect();

        let k = self.k.min(distances.len());
        if k < distances.len() {
            distances.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
            distances.truncate(k);
        }

        distances
            .into_iter()
            .map(|(d, i)| {
                let w = match self.weighting {
                    Weighting::Uniform => 1.0,
                    Weighting::Distance => 1.0 / (d + 1e-12),
                };
                (w, self.target[i])
            })
            .collect()
    }
}

impl FittedModel for FittedKnn {
    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Prediction, ModelError> {
        let queries = self.scaler.transform(features)?;
        match self.n_classes {
            Some(n_classes) => {
                let rows = queries
                    .iter()
                    .map(|q| {
                        let mut votes = vec![0.0; n_classes];
                        for (w, label) in self.neighbours(q) {
                            votes[label as usize] += w;
                        }
                        let total: f64 = votes.iter().sum();
                        votes.iter_mut().for_each(|v| *v /= total);
                        votes
                    })
                    .collect();
                Ok(Prediction::Probabilities(rows))
            }
            None => {
                let values = queries
                    .iter()
                    .map(|q| {
                        let neighbours = self.neighbours(q);
                        let total: f64 = neighbours.iter().map(|(w, _)| w).sum();
                        neighbours.iter().map(|(w, y)| w * y).sum::<f64>() / total
                    })
                    .collect();
                Ok(Prediction::Values(values))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| if i < 5 { 0.0 } else { 1.0 }).collect();
        (x, y)
    }

    #[test]
    fn classifier_votes() {
        let (x, y) = line();
        let mut p = Parameters::new();
        p.insert("n_neighbors", 3i64);
        let model = KNearestNeighbors::classifier().fit(&p, &x, &y).unwrap();
        let Prediction::Probabilities(rows) = model.predict_proba(&[vec![0.0], vec![9.0]]).unwrap()
        else {
            panic!("expected probabilities");
        };
        assert_eq!(rows[0], vec![1.0, 0.0]);
        assert_eq!(rows[1], vec![0.0, 1.0]);
    }

    #[test]
    fn regressor_averages_neighbours() {
        let x: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        let y = vec![0.0, 10.0, 20.0, 30.0, 40.0];
        let mut p = Parameters::new();
        p.insert("n_neighbors", 1i64);
        let model = KNearestNeighbors::regressor().fit(&p, &x, &y).unwrap();
        assert_eq!(
            model.predict_proba(&[vec![3.0]]).unwrap(),
            Prediction::Values(vec![30.0])
        );
    }

    #[test]
    fn k_larger_than_training_set() {
        let (x, y) = line();
        let mut p = Parameters::new();
        p.insert("n_neighbors", 50i64);
        p.insert("weights", "distance");
        let model = KNearestNeighbors::classifier().fit(&p, &x, &y).unwrap();
        assert_eq!(model.predict_proba(&x).unwrap().len(), 10);
    }

    #[test]
    fn rejects_bad_parameters() {
        let (x, y) = line();
        let mut p = Parameters::new();
        p.insert("n_neighbors", 0i64);
        assert!(KNearestNeighbors::classifier().fit(&p, &x, &y).is_err());
        let mut p = Parameters::new();
        p.insert("weights", "gaussian");
        assert!(KNearestNeighbors::classifier().fit(&p, &x, &y).is_err());
    }
}
