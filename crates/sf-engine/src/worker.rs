//! The background search loop.
//!
//! One worker runs per `restart`, on its own OS thread. It owns everything it
//! needs except the shared lifecycle flag and the ledger, and it checks the
//! flag only between rounds, so a round always completes once started.

use parking_lot::Mutex;
use sf_search::{Sampler, SearchSpace};
use sf_types::{ConfigError, Dataset, ScoreFunction};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cv::{CrossValidator, Folds};
use crate::ensemble::{EnsemblePolicy, EnsembleState, Ensembler};
use crate::events::{EngineEvent, EventSink};
use crate::ledger::ScoreLedger;
use crate::lifecycle::{AtomicLifecycle, LifecycleState};
use crate::storage::{LedgerFingerprint, LedgerStore, PersistedLedger};

/// Run bookkeeping shown in the status report.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunInfo {
    pub(crate) run_id: Option<Uuid>,
    pub(crate) run: u64,
    pub(crate) fatal_error: Option<String>,
}

/// State shared between the engine handle and the loop thread.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: AtomicLifecycle,
    pub(crate) ledger: ScoreLedger,
    pub(crate) run: Mutex<RunInfo>,
}

/// A dataset together with its fold assignment.
#[derive(Debug)]
pub(crate) struct LoadedData {
    pub(crate) dataset: Dataset,
    pub(crate) folds: Folds,
    pub(crate) fingerprint: LedgerFingerprint,
}

pub(crate) struct Worker {
    pub(crate) shared: Arc<Shared>,
    pub(crate) spaces: Vec<Arc<SearchSpace>>,
    pub(crate) data: Arc<LoadedData>,
    pub(crate) sampler: Box<dyn Sampler>,
    pub(crate) validator: CrossValidator,
    pub(crate) score_fn: ScoreFunction,
    pub(crate) ensembler: Ensembler,
    pub(crate) policy: EnsemblePolicy,
    pub(crate) store: Option<LedgerStore>,
    pub(crate) events: EventSink,
    pub(crate) run_id: Uuid,
    pub(crate) run: u64,
}

/// Marks the engine stopped when the loop exits, however it exits.
struct StopGuard(Arc<Shared>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.state.store(LifecycleState::Stopped);
    }
}

impl Worker {
    pub(crate) fn run(mut self) {
        let _stopped = StopGuard(Arc::clone(&self.shared));

        let ids: Vec<String> = self.spaces.iter().map(|s| s.id().to_string()).collect();
        info!(
            run_id = %self.run_id,
            run = self.run,
            spaces = ?ids,
            sampler = %self.sampler.name(),
            "search loop started"
        );
        self.events.emit(EngineEvent::Started {
            run_id: self.run_id,
            run: self.run,
            spaces: ids,
        });

        let mut rounds = 0u64;
        let reason = loop {
            if self.shared.state.load() != LifecycleState::Running {
                break "interrupted".to_string();
            }
            let Some(space) = self.spaces.get(rounds as usize % self.spaces.len().max(1)).cloned() else {
                break "no search spaces".to_string();
            };

            if let Err(err) = self.round(&space, rounds) {
                error!(space = %space.id(), error = %err, "fatal configuration error, stopping");
                self.shared.run.lock().fatal_error = Some(err.to_string());
                self.events.emit(EngineEvent::Fatal {
                    run_id: self.run_id,
                    error: err.to_string(),
                });
                break format!("fatal: {err}");
            }
            rounds += 1;
        };

        self.persist();
        info!(run_id = %self.run_id, rounds, %reason, "search loop stopped");
        self.events.emit(EngineEvent::Stopped {
            run_id: self.run_id,
            rounds,
            reason,
        });
    }

    /// One sample-evaluate-record cycle. Only configuration errors escape;
    /// evaluation failures are recorded against the space.
    pub(crate) fn round(&mut self, space: &SearchSpace, completed: u64) -> Result<(), ConfigError> {
        let before = self.shared.ledger.snapshot();
        let entry = before.get(space.id());
        let space_round = entry.map_or(0, |e| e.rounds);
        let previous = entry.and_then(|e| e.best_score);

        let candidate = self.sampler.sample(space, space_round)?;
        let data = Arc::clone(&self.data);
        let improved = match self.validator.evaluate(
            space,
            candidate,
            &data.dataset,
            &data.folds,
            &self.score_fn,
        ) {
            Ok(result) => {
                let improved = self.shared.ledger.record_if_better(&result);
                if improved {
                    info!(
                        space = %space.id(),
                        round = space_round,
                        score = result.score,
                        previous = ?previous,
                        parameters = %result.candidate.parameters,
                        "new best candidate"
                    );
                    self.events.emit(EngineEvent::Improved {
                        space_id: space.id().to_string(),
                        round: space_round,
                        score: result.score,
                        previous,
                    });
                    self.persist();
                }
                improved
            }
            Err(err) => {
                warn!(space = %space.id(), round = space_round, error = %err, "candidate failed");
                self.shared.ledger.record_failure(space.id(), &err);
                self.events.emit(EngineEvent::CandidateFailed {
                    space_id: space.id().to_string(),
                    round: space_round,
                    error: err.to_string(),
                });
                false
            }
        };

        if self.policy.should_recompute(improved, completed + 1) {
            let ensemble = publish_ensemble(
                &self.shared.ledger,
                &self.ensembler,
                data.dataset.target(),
                &self.score_fn,
            );
            if let Some(ensemble) = ensemble {
                self.events.emit(EngineEvent::EnsembleUpdated {
                    members: ensemble.members,
                    score: ensemble.score,
                });
            }
        }
        Ok(())
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let persisted =
            PersistedLedger::from_snapshot(&self.shared.ledger.snapshot(), self.data.fingerprint.clone());
        if let Err(err) = store.save(&persisted) {
            warn!(error = %err, "failed to save ledger");
        }
    }
}

/// Recompute the ensemble from the current ledger and publish it.
pub(crate) fn publish_ensemble(
    ledger: &ScoreLedger,
    ensembler: &Ensembler,
    target: &[f64],
    score_fn: &ScoreFunction,
) -> Option<EnsembleState> {
    let ensemble = ensembler.recompute(&ledger.snapshot(), target, score_fn);
    ledger.set_ensemble(ensemble.clone());
    ensemble
}
