//! The score ledger: best-known result per search space.
//!
//! Readers take an `Arc` to an immutable [`LedgerSnapshot`]; writers build a
//! modified copy and swap the pointer under a short lock. A reader therefore
//! always sees either the old or the new state of an entry, never a mix.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use sf_search::{CandidateId, SearchSpace, ENSEMBLE_ID};
use sf_types::{CandidateError, FittedModel, ModelError, Parameters, Prediction};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cv::EvaluationResult;
use crate::ensemble::EnsembleState;
use crate::storage::PersistedLedger;

/// Best result and counters for one search space.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub space_id: String,
    pub family: String,
    /// `None` until the first successful evaluation.
    pub best_score: Option<f64>,
    pub best_parameters: Option<Parameters>,
    pub best_candidate: Option<CandidateId>,
    /// Fold models of the best candidate. Empty after a restore from disk.
    pub models: Vec<Arc<dyn FittedModel>>,
    pub oof_prediction: Option<Arc<Prediction>>,
    pub test_prediction: Option<Arc<Prediction>>,
    pub rounds: u64,
    pub failed_rounds: u64,
    pub improvements: u64,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn new(space_id: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            space_id: space_id.into(),
            family: family.into(),
            best_score: None,
            best_parameters: None,
            best_candidate: None,
            models: Vec::new(),
            oof_prediction: None,
            test_prediction: None,
            rounds: 0,
            failed_rounds: 0,
            improvements: 0,
            last_error: None,
            updated_at: None,
        }
    }

    /// Average of the best candidate's fold models on new rows.
    pub fn predict(&self, features: &[Vec<f64>]) -> Result<Prediction, ModelError> {
        if self.models.is_empty() {
            return Err(ModelError::NotFitted);
        }
        let predictions = self
            .models
            .iter()
            .map(|model| model.predict_proba(features))
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&Prediction> = predictions.iter().collect();
        Prediction::mean(&refs).ok_or_else(|| ModelError::Other {
            message: "fold models disagree on prediction shape".into(),
        })
    }

    fn clear_best(&mut self) {
        *self = Self::new(std::mem::take(&mut self.space_id), std::mem::take(&mut self.family));
    }
}

/// Immutable view of the ledger at one point in time.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    /// Entries in search space registration order.
    pub entries: Vec<LedgerEntry>,
    pub ensemble: Option<EnsembleState>,
    /// Bumped on every publish.
    pub version: u64,
}

impl LedgerSnapshot {
    pub fn get(&self, space_id: &str) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.space_id == space_id)
    }

    /// Scored entries plus the ensemble under its reserved id.
    pub fn scores(&self) -> BTreeMap<String, f64> {
        let mut scores: BTreeMap<String, f64> = self
            .entries
            .iter()
            .filter_map(|e| e.best_score.map(|s| (e.space_id.clone(), s)))
            .collect();
        if let Some(ensemble) = &self.ensemble {
            scores.insert(ENSEMBLE_ID.to_string(), ensemble.score);
        }
        scores
    }

    /// Highest score overall. Families are considered in registration order
    /// before the ensemble, and only a strictly greater score takes over.
    pub fn best(&self) -> Option<(&str, f64)> {
        let families = self
            .entries
            .iter()
            .filter_map(|e| e.best_score.map(|s| (e.space_id.as_str(), s)));
        let ensemble = self.ensemble.as_ref().map(|e| (ENSEMBLE_ID, e.score));
        families
            .chain(ensemble)
            .fold(None, |best: Option<(&str, f64)>, (id, score)| match best {
                Some((_, best_score)) if score <= best_score => best,
                _ => Some((id, score)),
            })
    }

    pub fn total_rounds(&self) -> u64 {
        self.entries.iter().map(|e| e.rounds).sum()
    }

    pub fn failed_rounds(&self) -> u64 {
        self.entries.iter().map(|e| e.failed_rounds).sum()
    }
}

/// Thread-safe owner of the current [`LedgerSnapshot`].
#[derive(Debug)]
pub struct ScoreLedger {
    current: RwLock<Arc<LedgerSnapshot>>,
    /// Serializes read-modify-write cycles; readers never take it.
    write: Mutex<()>,
}

impl ScoreLedger {
    pub fn new(spaces: &[Arc<SearchSpace>]) -> Self {
        let snapshot = LedgerSnapshot {
            entries: spaces
                .iter()
                .map(|s| LedgerEntry::new(s.id(), s.family().name()))
                .collect(),
            ensemble: None,
            version: 0,
        };
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            write: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<LedgerSnapshot> {
        Arc::clone(&self.current.read())
    }

    fn update<R>(&self, f: impl FnOnce(&mut LedgerSnapshot) -> R) -> R {
        let _write = self.write.lock();
        let mut next = LedgerSnapshot::clone(&self.snapshot());
        let out = f(&mut next);
        next.version += 1;
        *self.current.write() = Arc::new(next);
        out
    }

    /// Count the round and keep the result if it strictly beats the current
    /// best. Ties and unknown ids never replace anything.
    pub fn record_if_better(&self, result: &EvaluationResult) -> bool {
        let space_id = &result.candidate.space_id;
        self.update(|snapshot| {
            let Some(entry) = snapshot.entries.iter_mut().find(|e| &e.space_id == space_id) else {
                warn!(space = %space_id, "result for unknown search space dropped");
                return false;
            };
            entry.rounds += 1;

            let improved = result.score.is_finite()
                && entry.best_score.map_or(true, |best| result.score > best);
            if improved {
                entry.best_score = Some(result.score);
                entry.best_parameters = Some(result.candidate.parameters.clone());
                entry.best_candidate = Some(result.candidate.id);
                entry.models = result.models.clone();
                entry.oof_prediction = Some(Arc::new(result.oof_prediction.clone()));
                entry.test_prediction = result.test_prediction.clone().map(Arc::new);
                entry.improvements += 1;
                entry.updated_at = Some(Utc::now());
            }
            improved
        })
    }

    pub fn record_failure(&self, space_id: &str, error: &CandidateError) {
        self.update(|snapshot| {
            if let Some(entry) = snapshot.entries.iter_mut().find(|e| e.space_id == space_id) {
                entry.rounds += 1;
                entry.failed_rounds += 1;
                entry.last_error = Some(error.to_string());
            }
        });
    }

    pub fn set_ensemble(&self, ensemble: Option<EnsembleState>) {
        self.update(|snapshot| snapshot.ensemble = ensemble);
    }

    /// Forget every score and counter, keeping the ids.
    pub fn reset(&self) {
        self.update(|snapshot| {
            snapshot.entries.iter_mut().for_each(LedgerEntry::clear_best);
            snapshot.ensemble = None;
        });
        debug!("ledger reset");
    }

    /// Align entries with the registered spaces: new spaces get a fresh
    /// entry, removed ones are dropped, order follows registration. An
    /// ensemble that referenced a removed space is discarded.
    pub fn sync_ids(&self, spaces: &[Arc<SearchSpace>]) {
        self.update(|snapshot| {
            let mut old = std::mem::take(&mut snapshot.entries);
            snapshot.entries = spaces
                .iter()
                .map(|space| match old.iter().position(|e| e.space_id == space.id()) {
                    Some(idx) => old.swap_remove(idx),
                    None => LedgerEntry::new(space.id(), space.family().name()),
                })
                .collect();

            let stale = snapshot.ensemble.as_ref().is_some_and(|ensemble| {
                ensemble
                    .members
                    .iter()
                    .any(|m| !spaces.iter().any(|s| s.id() == m))
            });
            if stale {
                snapshot.ensemble = None;
            }
        });
    }

    /// Merge persisted state into the ledger. A stored entry is taken only
    /// when it scores strictly higher than the in-memory one, so a restore
    /// never lowers a best score. Counters keep the larger value. Entries for
    /// ids that are not registered are skipped. Returns the number of entries
    /// taken from disk.
    pub fn restore(&self, persisted: &PersistedLedger) -> usize {
        self.update(|snapshot| {
            let mut restored = 0;
            for stored in &persisted.entries {
                let Some(entry) = snapshot.entries.iter_mut().find(|e| e.space_id == stored.space_id) else {
                    debug!(space = %stored.space_id, "skipping persisted entry for unknown space");
                    continue;
                };
                let adopt = match (stored.best_score, entry.best_score) {
                    (Some(saved), Some(current)) => saved > current,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if !adopt {
                    debug!(space = %stored.space_id, "keeping in-memory best over persisted entry");
                    continue;
                }
                let mut merged = stored.to_entry();
                merged.rounds = merged.rounds.max(entry.rounds);
                merged.failed_rounds = merged.failed_rounds.max(entry.failed_rounds);
                merged.improvements = merged.improvements.max(entry.improvements);
                if entry.last_error.is_some() {
                    merged.last_error = entry.last_error.take();
                }
                *entry = merged;
                restored += 1;
            }
            if restored > 0 {
                snapshot.ensemble = None;
            }
            restored
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sf_search::Candidate;
    use std::thread;
    use std::time::Duration;

    pub(crate) fn result(space_id: &str, score: f64) -> EvaluationResult {
        let mut parameters = Parameters::new();
        parameters.insert("score", score);
        EvaluationResult {
            candidate: Candidate::new(space_id, 0, parameters),
            models: Vec::new(),
            oof_prediction: Prediction::Values(vec![score; 4]),
            test_prediction: None,
            score,
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn spaces(ids: &[&str]) -> Vec<Arc<SearchSpace>> {
        ids.iter()
            .map(|id| {
                Arc::new(SearchSpace::new(
                    *id,
                    Arc::new(sf_models::RidgeRegression) as Arc<dyn sf_types::ModelFamily>,
                ))
            })
            .collect()
    }

    #[test]
    fn best_score_never_decreases() {
        let ledger = ScoreLedger::new(&spaces(&["a"]));
        let mut history = Vec::new();
        for score in [0.5, 0.7, 0.6, 0.9, 0.1, 0.9] {
            ledger.record_if_better(&result("a", score));
            history.push(ledger.snapshot().get("a").unwrap().best_score.unwrap());
        }
        assert_eq!(history, vec![0.5, 0.7, 0.7, 0.9, 0.9, 0.9]);
        let entry = ledger.snapshot().get("a").cloned().unwrap();
        assert_eq!(entry.rounds, 6);
        assert_eq!(entry.improvements, 3);
    }

    #[test]
    fn ties_keep_the_earlier_result() {
        let ledger = ScoreLedger::new(&spaces(&["a"]));
        let first = result("a", 0.8);
        let second = result("a", 0.8);
        assert!(ledger.record_if_better(&first));
        assert!(!ledger.record_if_better(&second));
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.get("a").unwrap().best_candidate, Some(first.candidate.id));
    }

    #[test]
    fn nan_and_unknown_ids_never_replace() {
        let ledger = ScoreLedger::new(&spaces(&["a"]));
        assert!(!ledger.record_if_better(&result("a", f64::NAN)));
        assert!(!ledger.record_if_better(&result("zzz", 1.0)));
        assert_eq!(ledger.snapshot().get("a").unwrap().best_score, None);
    }

    #[test]
    fn failures_are_counted() {
        let ledger = ScoreLedger::new(&spaces(&["a"]));
        ledger.record_failure("a", &CandidateError::NonFiniteScore { score: f64::NAN });
        let snapshot = ledger.snapshot();
        let entry = snapshot.get("a").unwrap();
        assert_eq!((entry.rounds, entry.failed_rounds), (1, 1));
        assert!(entry.last_error.as_deref().unwrap().contains("non-finite"));
        assert_eq!(snapshot.total_rounds(), 1);
    }

    #[test]
    fn snapshots_are_immutable() {
        let ledger = ScoreLedger::new(&spaces(&["a"]));
        let before = ledger.snapshot();
        ledger.record_if_better(&result("a", 0.4));
        assert_eq!(before.get("a").unwrap().best_score, None);
        assert!(ledger.snapshot().version > before.version);
    }

    #[test]
    fn reset_clears_scores_but_keeps_ids() {
        let ledger = ScoreLedger::new(&spaces(&["a", "b"]));
        ledger.record_if_better(&result("a", 0.4));
        ledger.record_if_better(&result("b", 0.6));
        ledger.reset();
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.entries.len(), 2);
        assert!(snapshot.entries.iter().all(|e| e.best_score.is_none() && e.rounds == 0));
        assert!(snapshot.scores().is_empty());
    }

    #[test]
    fn best_prefers_earlier_family_on_ties() {
        let ledger = ScoreLedger::new(&spaces(&["a", "b"]));
        ledger.record_if_better(&result("a", 0.7));
        ledger.record_if_better(&result("b", 0.7));
        assert_eq!(ledger.snapshot().best(), Some(("a", 0.7)));
        ledger.record_if_better(&result("b", 0.71));
        assert_eq!(ledger.snapshot().best(), Some(("b", 0.71)));
    }

    #[test]
    fn sync_ids_adds_and_drops_entries() {
        let ledger = ScoreLedger::new(&spaces(&["a", "b"]));
        ledger.record_if_better(&result("b", 0.3));
        ledger.sync_ids(&spaces(&["b", "c"]));
        let snapshot = ledger.snapshot();
        let ids: Vec<&str> = snapshot.entries.iter().map(|e| e.space_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(snapshot.get("b").unwrap().best_score, Some(0.3));
    }

    #[test]
    fn concurrent_readers_see_consistent_entries() {
        let ledger = Arc::new(ScoreLedger::new(&spaces(&["a"])));
        let writer = {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for i in 1..=500 {
                    ledger.record_if_better(&result("a", i as f64));
                }
            })
        };
        let mut last = 0.0;
        while !writer.is_finished() {
            let snapshot = ledger.snapshot();
            let entry = snapshot.get("a").unwrap();
            if let Some(score) = entry.best_score {
                assert!(score >= last);
                // parameters and score always come from the same result
                assert_eq!(entry.best_parameters.as_ref().unwrap().get_f64("score").unwrap(), score);
                last = score;
            }
        }
        writer.join().unwrap();
        assert_eq!(ledger.snapshot().get("a").unwrap().best_score, Some(500.0));
    }

    #[test]
    fn predict_without_models_is_not_fitted() {
        let entry = LedgerEntry::new("a", "ridge");
        assert_eq!(entry.predict(&[vec![1.0]]), Err(ModelError::NotFitted));
    }
}
