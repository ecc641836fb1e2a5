//! K-fold cross-validation with out-of-fold scoring.
//!
//! Every row of the training set lands in exactly one held-out fold. A
//! candidate is trained once per fold on the complement, predicts its
//! held-out rows, and the scattered out-of-fold predictions are scored once
//! against the full target. When test features are present each fold model
//! also predicts them and the fold predictions are averaged.

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use sf_search::{Candidate, SearchSpace};
use sf_types::{
    CandidateError, DataError, Dataset, FittedModel, Prediction, ProblemType, ScoreFunction,
};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Held-out row indices, one list per fold.
pub type Folds = Vec<Vec<usize>>;

/// Outcome of a successful candidate evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub candidate: Candidate,
    /// One fitted artifact per fold, in fold order.
    pub models: Vec<Arc<dyn FittedModel>>,
    /// Out-of-fold prediction in original row order.
    pub oof_prediction: Prediction,
    /// Fold models averaged over the test features, if any.
    pub test_prediction: Option<Prediction>,
    pub score: f64,
    pub duration: Duration,
}

struct FoldOutput {
    model: Arc<dyn FittedModel>,
    held_out: Prediction,
    test: Option<Prediction>,
}

#[derive(Debug, Clone, Copy)]
pub struct CrossValidator {
    problem_type: ProblemType,
    n_folds: usize,
    parallel: bool,
}

impl CrossValidator {
    pub fn new(problem_type: ProblemType, n_folds: usize, parallel: bool) -> Self {
        Self {
            problem_type,
            n_folds,
            parallel,
        }
    }

    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// Partition the training rows into folds. Classification folds are
    /// stratified: each class is shuffled and dealt across the folds, so every
    /// fold holds roughly the class proportions of the whole set.
    pub fn folds<R: Rng + ?Sized>(&self, dataset: &Dataset, rng: &mut R) -> Result<Folds, DataError> {
        let mut folds: Folds = vec![Vec::new(); self.n_folds];
        match self.problem_type {
            ProblemType::Classification => {
                let labels = dataset.class_labels()?;
                let n_classes = labels.iter().max().map_or(0, |m| m + 1);
                let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
                for (row, &label) in labels.iter().enumerate() {
                    by_class[label].push(row);
                }

                // offset keeps fold sizes balanced across classes
                let mut offset = 0;
                for (class, mut rows) in by_class.into_iter().enumerate() {
                    if rows.len() < self.n_folds {
                        return Err(DataError::NotStratifiable {
                            class,
                            count: rows.len(),
                            n_folds: self.n_folds,
                        });
                    }
                    let count = rows.len();
                    rows.shuffle(rng);
                    for (i, row) in rows.into_iter().enumerate() {
                        folds[(offset + i) % self.n_folds].push(row);
                    }
                    offset = (offset + count) % self.n_folds;
                }
            }
            ProblemType::Regression => {
                if dataset.n_rows() < self.n_folds {
                    return Err(DataError::TooFewRows {
                        rows: dataset.n_rows(),
                        n_folds: self.n_folds,
                    });
                }
                let mut rows: Vec<usize> = (0..dataset.n_rows()).collect();
                rows.shuffle(rng);
                for (i, row) in rows.into_iter().enumerate() {
                    folds[i % self.n_folds].push(row);
                }
            }
        }

        for fold in &mut folds {
            fold.sort_unstable();
        }
        Ok(folds)
    }

    /// Train and score one candidate. Model failures, panics, malformed
    /// predictions and non-finite scores all come back as [`CandidateError`].
    pub fn evaluate(
        &self,
        space: &SearchSpace,
        candidate: Candidate,
        dataset: &Dataset,
        folds: &[Vec<usize>],
        score_fn: &ScoreFunction,
    ) -> Result<EvaluationResult, CandidateError> {
        let started = Instant::now();

        let mut fold_of = vec![0usize; dataset.n_rows()];
        for (fold, rows) in folds.iter().enumerate() {
            for &row in rows {
                fold_of[row] = fold;
            }
        }

        let run_fold = |(fold, held_out): (usize, &Vec<usize>)| {
            catch_unwind(AssertUnwindSafe(|| {
                self.run_fold(space, &candidate, dataset, &fold_of, fold, held_out)
            }))
            .unwrap_or_else(|payload| {
                Err(CandidateError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            })
        };

        let outputs: Vec<FoldOutput> = if self.parallel {
            folds
                .par_iter()
                .enumerate()
                .map(run_fold)
                .collect::<Result<Vec<_>, CandidateError>>()?
        } else {
            folds
                .iter()
                .enumerate()
                .map(run_fold)
                .collect::<Result<Vec<_>, CandidateError>>()?
        };

        let oof_prediction = self.scatter(folds, &outputs, dataset.n_rows())?;

        let test_prediction = match dataset.test_features() {
            Some(test) => {
                let fold_tests: Vec<&Prediction> =
                    outputs.iter().filter_map(|o| o.test.as_ref()).collect();
                let averaged = Prediction::mean(&fold_tests).ok_or_else(|| {
                    CandidateError::PredictionShape {
                        expected: self.expected_shape(test.len()),
                        got: "inconsistent fold test predictions".into(),
                    }
                })?;
                Some(averaged)
            }
            None => None,
        };

        let score = score_fn.score(dataset.target(), &oof_prediction);
        if !score.is_finite() {
            return Err(CandidateError::NonFiniteScore { score });
        }

        let duration = started.elapsed();
        debug!(
            space = %space.id(),
            round = candidate.round,
            score,
            elapsed_ms = duration.as_millis() as u64,
            "candidate evaluated"
        );

        Ok(EvaluationResult {
            candidate,
            models: outputs.into_iter().map(|o| o.model).collect(),
            oof_prediction,
            test_prediction,
            score,
            duration,
        })
    }

    fn run_fold(
        &self,
        space: &SearchSpace,
        candidate: &Candidate,
        dataset: &Dataset,
        fold_of: &[usize],
        fold: usize,
        held_out: &[usize],
    ) -> Result<FoldOutput, CandidateError> {
        let train: Vec<usize> = (0..dataset.n_rows()).filter(|&row| fold_of[row] != fold).collect();
        let (x_train, y_train) = dataset.select_rows(&train);
        let (x_valid, _) = dataset.select_rows(held_out);

        let model = space
            .family()
            .fit(&candidate.parameters, &x_train, &y_train)
            .map_err(|source| CandidateError::Fit { fold, source })?;

        let held_out_prediction = model
            .predict_proba(&x_valid)
            .map_err(|source| CandidateError::Predict { fold, source })?;
        self.check_shape(&held_out_prediction, held_out.len())?;

        let test = match dataset.test_features() {
            Some(test) => {
                let prediction = model
                    .predict_proba(test)
                    .map_err(|source| CandidateError::Predict { fold, source })?;
                self.check_shape(&prediction, test.len())?;
                Some(prediction)
            }
            None => None,
        };

        Ok(FoldOutput {
            model,
            held_out: held_out_prediction,
            test,
        })
    }

    fn check_shape(&self, prediction: &Prediction, rows: usize) -> Result<(), CandidateError> {
        let ok = match (self.problem_type, prediction) {
            (ProblemType::Classification, Prediction::Probabilities(probs)) => {
                probs.len() == rows
                    && probs.first().map_or(true, |r| r.len() >= 2)
                    && probs.iter().all(|r| r.len() == probs[0].len())
            }
            (ProblemType::Regression, Prediction::Values(values)) => values.len() == rows,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(CandidateError::PredictionShape {
                expected: self.expected_shape(rows),
                got: prediction.shape(),
            })
        }
    }

    fn expected_shape(&self, rows: usize) -> String {
        match self.problem_type {
            ProblemType::Classification => format!("probabilities {rows}xK"),
            ProblemType::Regression => format!("values {rows}"),
        }
    }

    /// Put fold predictions back into original row order.
    fn scatter(
        &self,
        folds: &[Vec<usize>],
        outputs: &[FoldOutput],
        n_rows: usize,
    ) -> Result<Prediction, CandidateError> {
        match self.problem_type {
            ProblemType::Classification => {
                let width = outputs.first().and_then(|o| o.held_out.n_columns()).unwrap_or(0);
                let mut rows = vec![Vec::new(); n_rows];
                for (held_out, output) in folds.iter().zip(outputs) {
                    let Prediction::Probabilities(fold_rows) = &output.held_out else {
                        continue;
                    };
                    for (&row, probs) in held_out.iter().zip(fold_rows) {
                        if probs.len() != width {
                            return Err(CandidateError::PredictionShape {
                                expected: format!("{width} probability columns in every fold"),
                                got: format!("{} columns", probs.len()),
                            });
                        }
                        rows[row] = probs.clone();
                    }
                }
                Ok(Prediction::Probabilities(rows))
            }
            ProblemType::Regression => {
                let mut values = vec![0.0; n_rows];
                for (held_out, output) in folds.iter().zip(outputs) {
                    if let Prediction::Values(fold_values) = &output.held_out {
                        for (&row, value) in held_out.iter().zip(fold_values) {
                            values[row] = *value;
                        }
                    }
                }
                Ok(Prediction::Values(values))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
