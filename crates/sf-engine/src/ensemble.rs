//! Blending the per-family best candidates into one ensemble.
//!
//! The ensemble works on out-of-fold predictions, so it is scored exactly
//! like a single family and needs no refitting. That also makes it
//! recomputable from a ledger restored from disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sf_types::{Prediction, ScoreFunction};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ledger::{LedgerEntry, LedgerSnapshot};

/// Turns the current best members into blend weights.
pub trait BlendStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// One non-negative weight per member. The result is normalized by the
    /// ensembler; an all-zero vector falls back to uniform weights.
    fn weights(&self, members: &[&LedgerEntry]) -> Vec<f64>;
}

impl fmt::Debug for dyn BlendStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlendStrategy({})", self.name())
    }
}

/// Equal weights for every member.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformBlend;

impl BlendStrategy for UniformBlend {
    fn name(&self) -> &str {
        "uniform"
    }

    fn weights(&self, members: &[&LedgerEntry]) -> Vec<f64> {
        vec![1.0; members.len()]
    }
}

/// Weights proportional to each member's score, clipped at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreWeightedBlend;

impl BlendStrategy for ScoreWeightedBlend {
    fn name(&self) -> &str {
        "score_weighted"
    }

    fn weights(&self, members: &[&LedgerEntry]) -> Vec<f64> {
        members
            .iter()
            .map(|m| m.best_score.unwrap_or(0.0).max(0.0))
            .collect()
    }
}

/// When the search loop recomputes the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsemblePolicy {
    /// After any round that improved a family's best.
    #[default]
    OnImprovement,
    EveryRound,
    /// Every n-th completed round of the run.
    EveryNRounds(u64),
    Disabled,
}

impl EnsemblePolicy {
    /// `round` counts completed rounds of the current run, starting at 1.
    pub fn should_recompute(self, improved: bool, round: u64) -> bool {
        match self {
            Self::OnImprovement => improved,
            Self::EveryRound => true,
            Self::EveryNRounds(n) => round % n.max(1) == 0,
            Self::Disabled => false,
        }
    }
}

/// A blended ensemble and its score.
#[derive(Debug, Clone)]
pub struct EnsembleState {
    pub members: Vec<String>,
    /// Normalized, same order as `members`.
    pub weights: Vec<f64>,
    pub score: f64,
    pub strategy: String,
    pub oof_prediction: Arc<Prediction>,
    pub test_prediction: Option<Arc<Prediction>>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Ensembler {
    strategy: Arc<dyn BlendStrategy>,
}

impl Default for Ensembler {
    fn default() -> Self {
        Self::new(Arc::new(UniformBlend))
    }
}

impl Ensembler {
    pub fn new(strategy: Arc<dyn BlendStrategy>) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &dyn BlendStrategy {
        self.strategy.as_ref()
    }

    /// Blend every scored entry of the snapshot. No members gives `None`; a
    /// single member is reported as-is with weight 1 and its own score.
    pub fn recompute(
        &self,
        snapshot: &LedgerSnapshot,
        target: &[f64],
        score_fn: &ScoreFunction,
    ) -> Option<EnsembleState> {
        let members: Vec<&LedgerEntry> = snapshot
            .entries
            .iter()
            .filter(|e| e.best_score.is_some() && e.oof_prediction.is_some())
            .collect();

        match members.as_slice() {
            [] => None,
            [only] => Some(EnsembleState {
                members: vec![only.space_id.clone()],
                weights: vec![1.0],
                score: only.best_score?,
                strategy: self.strategy.name().to_string(),
                oof_prediction: Arc::clone(only.oof_prediction.as_ref()?),
                test_prediction: only.test_prediction.clone(),
                computed_at: Utc::now(),
            }),
            _ => self.blend(&members, target, score_fn),
        }
    }

    fn blend(
        &self,
        members: &[&LedgerEntry],
        target: &[f64],
        score_fn: &ScoreFunction,
    ) -> Option<EnsembleState> {
        let weights = normalize(self.strategy.weights(members), members.len());

        let oofs: Vec<&Prediction> = members
            .iter()
            .filter_map(|m| m.oof_prediction.as_deref())
            .collect();
        let Some(oof_prediction) = Prediction::weighted_mean(&oofs, &weights) else {
            warn!(
                members = members.len(),
                "member predictions differ in shape, ensemble skipped"
            );
            return None;
        };

        let score = score_fn.score(target, &oof_prediction);
        if !score.is_finite() {
            warn!(score, "ensemble score is not finite, ensemble skipped");
            return None;
        }

        let tests: Vec<&Prediction> = members
            .iter()
            .filter_map(|m| m.test_prediction.as_deref())
            .collect();
        let test_prediction = if tests.len() == members.len() {
            Prediction::weighted_mean(&tests, &weights).map(Arc::new)
        } else {
            None
        };

        let ids: Vec<String> = members.iter().map(|m| m.space_id.clone()).collect();
        debug!(members = ?ids, score, strategy = %self.strategy.name(), "ensemble blended");

        Some(EnsembleState {
            members: ids,
            weights,
            score,
            strategy: self.strategy.name().to_string(),
            oof_prediction: Arc::new(oof_prediction),
            test_prediction,
            computed_at: Utc::now(),
        })
    }
}

fn normalize(weights: Vec<f64>, len: usize) -> Vec<f64> {
    let valid = weights.len() == len && weights.iter().all(|w| w.is_finite() && *w >= 0.0);
    let total: f64 = weights.iter().sum();
    if !valid || total <= 0.0 {
        return vec![1.0 / len as f64; len];
    }
    weights.into_iter().map(|w| w / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::spaces;
    use crate::ledger::ScoreLedger;
    use crate::cv::EvaluationResult;
    use sf_models::metrics::{neg_mean_squared_error, roc_auc};
    use sf_search::Candidate;
    use sf_types::Parameters;
    use std::time::Duration;

    fn scored(space_id: &str, oof: Prediction, test: Option<Prediction>, score: f64) -> EvaluationResult {
        EvaluationResult {
            candidate: Candidate::new(space_id, 0, Parameters::new()),
            models: Vec::new(),
            oof_prediction: oof,
            test_prediction: test,
            score,
            duration: Duration::ZERO,
        }
    }

    fn probs(p1: &[f64]) -> Prediction {
        Prediction::Probabilities(p1.iter().map(|&p| vec![1.0 - p, p]).collect())
    }

    const TRUTH: [f64; 4] = [0.0, 0.0, 1.0, 1.0];

    #[test]
    fn no_members_no_ensemble() {
        let ledger = ScoreLedger::new(&spaces(&["a"]));
        let auc = ScoreFunction::new("roc_auc", roc_auc);
        assert!(Ensembler::default().recompute(&ledger.snapshot(), &TRUTH, &auc).is_none());
    }

    #[test]
    fn single_member_ensemble_equals_member() {
        let ledger = ScoreLedger::new(&spaces(&["a", "b"]));
        let auc = ScoreFunction::new("roc_auc", roc_auc);
        // a deliberately odd stored score: the ensemble must report it verbatim
        ledger.record_if_better(&scored("a", probs(&[0.1, 0.6, 0.4, 0.9]), None, 0.123));

        let ensemble = Ensembler::default()
            .recompute(&ledger.snapshot(), &TRUTH, &auc)
            .unwrap();
        assert_eq!(ensemble.members, vec!["a".to_string()]);
        assert_eq!(ensemble.weights, vec![1.0]);
        assert_eq!(ensemble.score, 0.123);
    }

    #[test]
    fn uniform_blend_averages_and_rescores() {
        let ledger = ScoreLedger::new(&spaces(&["a", "b"]));
        let auc = ScoreFunction::new("roc_auc", roc_auc);
        let a = probs(&[0.1, 0.6, 0.4, 0.9]);
        let b = probs(&[0.3, 0.2, 0.8, 0.7]);
        ledger.record_if_better(&scored("a", a.clone(), Some(probs(&[0.2])), roc_auc(&TRUTH, &a)));
        ledger.record_if_better(&scored("b", b.clone(), Some(probs(&[0.6])), roc_auc(&TRUTH, &b)));

        let ensemble = Ensembler::default()
            .recompute(&ledger.snapshot(), &TRUTH, &auc)
            .unwrap();
        assert_eq!(ensemble.weights, vec![0.5, 0.5]);
        let blended = Prediction::mean(&[&a, &b]).unwrap();
        assert_eq!(*ensemble.oof_prediction, blended);
        assert_eq!(ensemble.score, roc_auc(&TRUTH, &blended));
        assert_eq!(ensemble.strategy, "uniform");
        let test = ensemble.test_prediction.unwrap();
        let Prediction::Probabilities(rows) = test.as_ref() else {
            panic!("expected probabilities");
        };
        assert!((rows[0][1] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_prediction_needs_every_member() {
        let ledger = ScoreLedger::new(&spaces(&["a", "b"]));
        let auc = ScoreFunction::new("roc_auc", roc_auc);
        ledger.record_if_better(&scored("a", probs(&[0.1, 0.2, 0.8, 0.9]), Some(probs(&[0.5])), 1.0));
        ledger.record_if_better(&scored("b", probs(&[0.2, 0.1, 0.9, 0.8]), None, 1.0));
        let ensemble = Ensembler::default()
            .recompute(&ledger.snapshot(), &TRUTH, &auc)
            .unwrap();
        assert!(ensemble.test_prediction.is_none());
    }

    #[test]
    fn score_weighted_blend() {
        let ledger = ScoreLedger::new(&spaces(&["a", "b"]));
        let mse = ScoreFunction::new("neg_mse", neg_mean_squared_error);
        let truth = [1.0, 2.0];
        ledger.record_if_better(&scored("a", Prediction::Values(vec![1.0, 2.0]), None, 3.0));
        ledger.record_if_better(&scored("b", Prediction::Values(vec![5.0, 6.0]), None, 1.0));

        let ensemble = Ensembler::new(Arc::new(ScoreWeightedBlend))
            .recompute(&ledger.snapshot(), &truth, &mse)
            .unwrap();
        assert_eq!(ensemble.weights, vec![0.75, 0.25]);
        assert_eq!(*ensemble.oof_prediction, Prediction::Values(vec![2.0, 3.0]));
        assert_eq!(ensemble.score, -1.0);
    }

    #[test]
    fn negative_scores_fall_back_to_uniform() {
        assert_eq!(normalize(vec![0.0, 0.0], 2), vec![0.5, 0.5]);
        assert_eq!(normalize(vec![f64::NAN, 1.0], 2), vec![0.5, 0.5]);
        assert_eq!(normalize(vec![1.0, 3.0], 2), vec![0.25, 0.75]);
    }

    #[test]
    fn mismatched_shapes_skip_the_ensemble() {
        let ledger = ScoreLedger::new(&spaces(&["a", "b"]));
        let auc = ScoreFunction::new("roc_auc", roc_auc);
        ledger.record_if_better(&scored("a", probs(&[0.1, 0.2, 0.8, 0.9]), None, 1.0));
        ledger.record_if_better(&scored("b", Prediction::Values(vec![0.0; 4]), None, 0.5));
        assert!(Ensembler::default().recompute(&ledger.snapshot(), &TRUTH, &auc).is_none());
    }

    #[test]
    fn policy_decisions() {
        assert!(EnsemblePolicy::default().should_recompute(true, 1));
        assert!(!EnsemblePolicy::OnImprovement.should_recompute(false, 1));
        assert!(EnsemblePolicy::EveryRound.should_recompute(false, 7));
        assert!(EnsemblePolicy::EveryNRounds(3).should_recompute(false, 6));
        assert!(!EnsemblePolicy::EveryNRounds(3).should_recompute(true, 7));
        assert!(EnsemblePolicy::EveryNRounds(0).should_recompute(false, 5));
        assert!(!EnsemblePolicy::Disabled.should_recompute(true, 1));
    }
}
