use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sf_types::Parameters;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::ensemble::EnsembleState;
use crate::ledger::{LedgerEntry, LedgerSnapshot};
use crate::lifecycle::LifecycleState;

/// Per-family part of the status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyStatus {
    pub id: String,
    pub family: String,
    pub score: Option<f64>,
    pub parameters: Option<Parameters>,
    pub rounds: u64,
    pub failed_rounds: u64,
    pub improvements: u64,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&LedgerEntry> for FamilyStatus {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.space_id.clone(),
            family: entry.family.clone(),
            score: entry.best_score,
            parameters: entry.best_parameters.clone(),
            rounds: entry.rounds,
            failed_rounds: entry.failed_rounds,
            improvements: entry.improvements,
            last_error: entry.last_error.clone(),
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleStatus {
    pub members: Vec<String>,
    pub weights: Vec<f64>,
    pub score: f64,
    pub strategy: String,
    pub computed_at: DateTime<Utc>,
}

impl From<&EnsembleState> for EnsembleStatus {
    fn from(state: &EnsembleState) -> Self {
        Self {
            members: state.members.clone(),
            weights: state.weights.clone(),
            score: state.score,
            strategy: state.strategy.clone(),
            computed_at: state.computed_at,
        }
    }
}

/// Point-in-time report of the engine, safe to request while running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: LifecycleState,
    pub run_id: Option<Uuid>,
    /// Number of runs started since the engine was created.
    pub run: u64,
    /// Best score per search space id, plus `ensemble` when one exists.
    pub scores: BTreeMap<String, f64>,
    pub families: Vec<FamilyStatus>,
    pub ensemble: Option<EnsembleStatus>,
    pub best_id: Option<String>,
    pub best_score: Option<f64>,
    pub total_rounds: u64,
    pub failed_rounds: u64,
    /// Set when the last run ended on a configuration error.
    pub fatal_error: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl EngineStatus {
    pub(crate) fn build(
        snapshot: &LedgerSnapshot,
        state: LifecycleState,
        run_id: Option<Uuid>,
        run: u64,
        fatal_error: Option<String>,
    ) -> Self {
        let best = snapshot.best();
        Self {
            state,
            run_id,
            run,
            scores: snapshot.scores(),
            families: snapshot.entries.iter().map(FamilyStatus::from).collect(),
            ensemble: snapshot.ensemble.as_ref().map(EnsembleStatus::from),
            best_id: best.map(|(id, _)| id.to_string()),
            best_score: best.map(|(_, score)| score),
            total_rounds: snapshot.total_rounds(),
            failed_rounds: snapshot.failed_rounds(),
            fatal_error,
            generated_at: Utc::now(),
        }
    }

    pub fn family(&self, id: &str) -> Option<&FamilyStatus> {
        self.families.iter().find(|f| f.id == id)
    }
}
