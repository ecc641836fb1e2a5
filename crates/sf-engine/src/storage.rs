//! On-disk ledger persistence under the engine's local directory.
//!
//! Fitted models are not stored: an entry keeps its score, parameters,
//! counters and predictions, which is enough to report status, rebuild the
//! ensemble and serve the best test prediction after a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sf_types::{DataFingerprint, Parameters, Prediction, ProblemType, SfResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::ledger::{LedgerEntry, LedgerSnapshot};

pub const LEDGER_FILE: &str = "ledger.json";
const FORMAT_VERSION: u32 = 1;

/// What a persisted ledger was computed against. A stored ledger is only
/// restored when every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFingerprint {
    pub problem_type: ProblemType,
    pub n_folds: usize,
    pub score_name: String,
    pub data: DataFingerprint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub space_id: String,
    pub family: String,
    pub best_score: Option<f64>,
    pub best_parameters: Option<Parameters>,
    pub oof_prediction: Option<Prediction>,
    pub test_prediction: Option<Prediction>,
    pub rounds: u64,
    pub failed_rounds: u64,
    pub improvements: u64,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PersistedEntry {
    fn from_entry(entry: &LedgerEntry) -> Self {
        Self {
            space_id: entry.space_id.clone(),
            family: entry.family.clone(),
            best_score: entry.best_score,
            best_parameters: entry.best_parameters.clone(),
            oof_prediction: entry.oof_prediction.as_deref().cloned(),
            test_prediction: entry.test_prediction.as_deref().cloned(),
            rounds: entry.rounds,
            failed_rounds: entry.failed_rounds,
            improvements: entry.improvements,
            last_error: entry.last_error.clone(),
            updated_at: entry.updated_at,
        }
    }

    pub(crate) fn to_entry(&self) -> LedgerEntry {
        let mut entry = LedgerEntry::new(&self.space_id, &self.family);
        entry.best_score = self.best_score;
        entry.best_parameters = self.best_parameters.clone();
        entry.oof_prediction = self.oof_prediction.clone().map(Arc::new);
        entry.test_prediction = self.test_prediction.clone().map(Arc::new);
        entry.rounds = self.rounds;
        entry.failed_rounds = self.failed_rounds;
        entry.improvements = self.improvements;
        entry.last_error = self.last_error.clone();
        entry.updated_at = self.updated_at;
        entry
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedLedger {
    pub format_version: u32,
    pub fingerprint: LedgerFingerprint,
    pub saved_at: DateTime<Utc>,
    pub entries: Vec<PersistedEntry>,
}

impl PersistedLedger {
    pub fn from_snapshot(snapshot: &LedgerSnapshot, fingerprint: LedgerFingerprint) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            fingerprint,
            saved_at: Utc::now(),
            entries: snapshot.entries.iter().map(PersistedEntry::from_entry).collect(),
        }
    }

    pub fn is_compatible(&self, fingerprint: &LedgerFingerprint) -> bool {
        self.format_version == FORMAT_VERSION && &self.fingerprint == fingerprint
    }
}

/// Reads and writes `ledger.json` in the local directory.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    root: PathBuf,
}

impl LedgerStore {
    pub fn new<P: AsRef<Path>>(root: P) -> SfResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    /// Write through a temporary file and rename, so a crash never leaves a
    /// truncated ledger behind.
    pub fn save(&self, ledger: &PersistedLedger) -> SfResult<()> {
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(ledger)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), entries = ledger.entries.len(), "ledger saved");
        Ok(())
    }

    /// `Ok(None)` when nothing has been saved yet.
    pub fn load(&self) -> SfResult<Option<PersistedLedger>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{result, spaces};
    use crate::ledger::ScoreLedger;
    use sf_types::SfError;

    fn fingerprint(rows: usize) -> LedgerFingerprint {
        LedgerFingerprint {
            problem_type: ProblemType::Regression,
            n_folds: 5,
            score_name: "r2".into(),
            data: DataFingerprint {
                rows,
                columns: 2,
                test_rows: 0,
                checksum: 42,
            },
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("nested")).unwrap();
        assert!(store.load().unwrap().is_none());

        let ledger = ScoreLedger::new(&spaces(&["a", "b"]));
        ledger.record_if_better(&result("a", 0.75));
        let persisted = PersistedLedger::from_snapshot(&ledger.snapshot(), fingerprint(10));
        store.save(&persisted).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, persisted);
        assert!(loaded.is_compatible(&fingerprint(10)));
        assert!(!loaded.is_compatible(&fingerprint(11)));
        assert!(!store.path().with_extension("json.tmp").exists());

        let restored = ScoreLedger::new(&spaces(&["a", "c"]));
        assert_eq!(restored.restore(&loaded), 1);
        let snapshot = restored.snapshot();
        let entry = snapshot.get("a").unwrap();
        assert_eq!(entry.best_score, Some(0.75));
        assert_eq!(entry.rounds, 1);
        assert!(entry.models.is_empty());
        assert!(snapshot.get("b").is_none());
    }

    #[test]
    fn scores_reload_bit_for_bit() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path()).unwrap();
        let score = 0.9438888888888889;
        let ledger = ScoreLedger::new(&spaces(&["a", "b"]));
        ledger.record_if_better(&result("a", score));
        ledger.record_if_better(&result("b", 0.1 + 0.2));
        store
            .save(&PersistedLedger::from_snapshot(&ledger.snapshot(), fingerprint(10)))
            .unwrap();

        let restored = ScoreLedger::new(&spaces(&["a", "b"]));
        restored.restore(&store.load().unwrap().unwrap());
        let snapshot = restored.snapshot();
        assert_eq!(snapshot.get("a").unwrap().best_score.map(f64::to_bits), Some(score.to_bits()));
        assert_eq!(
            snapshot.get("b").unwrap().best_score.map(f64::to_bits),
            Some((0.1f64 + 0.2).to_bits())
        );

        // an equal score after a reload is still a tie
        assert!(!restored.record_if_better(&result("a", score)));
    }

    #[test]
    fn restore_never_lowers_a_best_score() {
        let saved = ScoreLedger::new(&spaces(&["a", "b", "c"]));
        saved.record_if_better(&result("a", 0.6));
        saved.record_if_better(&result("b", 0.5));
        saved.record_if_better(&result("c", 0.9));
        let persisted = PersistedLedger::from_snapshot(&saved.snapshot(), fingerprint(10));

        let live = ScoreLedger::new(&spaces(&["a", "b", "c"]));
        live.record_if_better(&result("a", 0.8));
        live.record_if_better(&result("a", 0.1));
        live.record_if_better(&result("c", 0.9));
        assert_eq!(live.restore(&persisted), 1);

        let snapshot = live.snapshot();
        let a = snapshot.get("a").unwrap();
        assert_eq!(a.best_score, Some(0.8));
        assert_eq!(a.rounds, 2);
        assert_eq!(snapshot.get("b").unwrap().best_score, Some(0.5));
        // an equal stored score keeps the in-memory result, which knows its candidate
        assert!(snapshot.get("c").unwrap().best_candidate.is_some());
        assert!(snapshot.get("b").unwrap().best_candidate.is_none());

        let empty = ScoreLedger::new(&spaces(&["a", "b", "c"]));
        let blank = PersistedLedger::from_snapshot(&empty.snapshot(), fingerprint(10));
        assert_eq!(live.restore(&blank), 0);
        assert_eq!(live.snapshot().get("a").unwrap().best_score, Some(0.8));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path()).unwrap();
        fs::write(store.path(), b"{ not json").unwrap();
        assert!(matches!(store.load(), Err(SfError::Serialization(_))));
    }
}
