//! The engine handle: lifecycle control, data loading and status queries.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sf_search::{RandomSampler, SearchSpace, SearchSpaceRegistry, ENSEMBLE_ID};
use sf_types::{
    ConfigError, Dataset, LifecycleError, ModelError, Prediction, SfError, SfResult,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::{check_supported, EngineConfig};
use crate::cv::CrossValidator;
use crate::ensemble::{EnsemblePolicy, Ensembler};
use crate::events::EventSink;
use crate::ledger::{LedgerSnapshot, ScoreLedger};
use crate::lifecycle::{AtomicLifecycle, LifecycleState};
use crate::status::EngineStatus;
use crate::storage::{LedgerFingerprint, LedgerStore, PersistedLedger};
use crate::worker::{publish_ensemble, LoadedData, RunInfo, Shared, Worker};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Mutable engine state only touched by control operations.
struct Control {
    registry: SearchSpaceRegistry,
    data: Option<Arc<LoadedData>>,
    handle: Option<JoinHandle<()>>,
    rng: ChaCha8Rng,
}

/// Interruptible background hyperparameter search.
///
/// `restart` returns immediately and the search continues on a dedicated
/// thread until `interrupt` is called. The ledger survives an interrupt, so a
/// later `restart` resumes from the best results found so far. Every method
/// takes `&self`; wrap the engine in an `Arc` to control it from several
/// threads.
pub struct Engine {
    config: EngineConfig,
    validator: CrossValidator,
    ensembler: Ensembler,
    store: Option<LedgerStore>,
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl Engine {
    /// Validate the configuration. Nothing runs until data is loaded and
    /// [`Engine::restart`] is called.
    pub fn new(config: EngineConfig) -> SfResult<Self> {
        let registry = config.validate()?;
        let store = if config.persistence {
            Some(LedgerStore::new(&config.local_dir)?)
        } else {
            None
        };
        let rng = ChaCha8Rng::seed_from_u64(config.seed.unwrap_or_else(rand::random));

        info!(
            problem_type = %config.problem_type,
            spaces = ?registry.list_ids(),
            n_folds = config.n_folds,
            score = %config.score_fn.name(),
            ensemble_policy = ?config.ensemble_policy,
            blend = %config.blend_strategy.name(),
            "engine created"
        );

        Ok(Self {
            validator: CrossValidator::new(config.problem_type, config.n_folds, config.parallel_folds),
            ensembler: Ensembler::new(Arc::clone(&config.blend_strategy)),
            store,
            shared: Arc::new(Shared {
                state: AtomicLifecycle::new(LifecycleState::Idle),
                ledger: ScoreLedger::new(registry.spaces()),
                run: Mutex::new(RunInfo::default()),
            }),
            control: Mutex::new(Control {
                registry,
                data: None,
                handle: None,
                rng,
            }),
            config,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.state.load()
    }

    /// Replace the dataset. Fold assignment happens here, so stratification
    /// problems surface as [`sf_types::DataError`]s. Every ledger entry goes
    /// back to "no score" and the engine returns to `Idle`.
    pub fn load_data(&self, dataset: Dataset) -> SfResult<()> {
        let mut control = self.control.lock();
        if self.state().is_active() {
            return Err(LifecycleError::Busy {
                operation: "load data".into(),
            }
            .into());
        }

        let folds = self.validator.folds(&dataset, &mut control.rng)?;
        let fingerprint = LedgerFingerprint {
            problem_type: self.config.problem_type,
            n_folds: self.config.n_folds,
            score_name: self.config.score_fn.name().to_string(),
            data: dataset.fingerprint(),
        };
        info!(
            rows = dataset.n_rows(),
            features = dataset.n_features(),
            test_rows = dataset.test_features().map_or(0, <[_]>::len),
            "dataset loaded"
        );

        control.data = Some(Arc::new(LoadedData {
            dataset,
            folds,
            fingerprint,
        }));
        self.shared.ledger.reset();
        self.shared.run.lock().fatal_error = None;
        self.shared.state.store(LifecycleState::Idle);
        Ok(())
    }

    /// Start or resume the search on a background thread.
    pub fn restart(&self) -> SfResult<()> {
        let mut control = self.control.lock();
        match self.state() {
            LifecycleState::Running => return Err(LifecycleError::AlreadyRunning.into()),
            LifecycleState::Interrupting => return Err(LifecycleError::StillInterrupting.into()),
            LifecycleState::Idle | LifecycleState::Stopped => {}
        }
        let data = control.data.clone().ok_or(LifecycleError::NoData)?;
        if control.registry.is_empty() {
            return Err(ConfigError::NoSearchSpaces.into());
        }
        if let Some(handle) = control.handle.take() {
            join_worker(handle);
        }

        let run_id = Uuid::new_v4();
        let run = {
            let mut info = self.shared.run.lock();
            info.run += 1;
            info.run_id = Some(run_id);
            info.fatal_error = None;
            info.run
        };

        let worker = Worker {
            shared: Arc::clone(&self.shared),
            spaces: control.registry.spaces().to_vec(),
            data,
            sampler: Box::new(RandomSampler::seeded(control.rng.random())),
            validator: self.validator,
            score_fn: self.config.score_fn.clone(),
            ensembler: self.ensembler.clone(),
            policy: self.config.ensemble_policy,
            store: self.store.clone(),
            events: EventSink::new(self.config.events.clone()),
            run_id,
            run,
        };

        self.shared.state.store(LifecycleState::Running);
        let spawned = thread::Builder::new()
            .name(format!("sifter-search-{run}"))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                control.handle = Some(handle);
                info!(%run_id, run, "search started");
                Ok(())
            }
            Err(err) => {
                self.shared.state.store(LifecycleState::Stopped);
                error!(error = %err, "failed to spawn search thread");
                Err(err.into())
            }
        }
    }

    /// Ask the loop to stop after its current round. Returns immediately; a
    /// no-op unless the engine is running.
    pub fn interrupt(&self) {
        match self
            .shared
            .state
            .transition(LifecycleState::Running, LifecycleState::Interrupting)
        {
            Ok(()) => info!("interrupt requested"),
            Err(state) => debug!(%state, "interrupt ignored"),
        }
    }

    /// Poll until the loop has stopped, up to `timeout`. Returns whether the
    /// engine is no longer running.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.state().is_active() {
                let handle = self.control.lock().handle.take();
                if let Some(handle) = handle {
                    join_worker(handle);
                }
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Current scores and lifecycle state. Never waits for the loop.
    pub fn request_status(&self) -> EngineStatus {
        let snapshot = self.shared.ledger.snapshot();
        let info = self.shared.run.lock().clone();
        EngineStatus::build(&snapshot, self.state(), info.run_id, info.run, info.fatal_error)
    }

    /// Raw view of the ledger, including fitted models.
    pub fn snapshot(&self) -> Arc<LedgerSnapshot> {
        self.shared.ledger.snapshot()
    }

    pub fn search_space_ids(&self) -> Vec<String> {
        self.control.lock().registry.list_ids()
    }

    pub fn add_search_space(&self, space: SearchSpace) -> SfResult<()> {
        let mut control = self.control.lock();
        if self.state().is_active() {
            return Err(LifecycleError::SearchSpacesFrozen.into());
        }
        check_supported(&space, self.config.problem_type)?;
        let id = space.id().to_string();
        control.registry.register(space)?;
        self.shared.ledger.sync_ids(control.registry.spaces());
        info!(space = %id, "search space added");
        Ok(())
    }

    pub fn remove_search_space(&self, id: &str) -> SfResult<()> {
        let mut control = self.control.lock();
        if self.state().is_active() {
            return Err(LifecycleError::SearchSpacesFrozen.into());
        }
        if control.registry.remove(id).is_none() {
            return Err(LifecycleError::UnknownSpace { id: id.to_string() }.into());
        }
        self.shared.ledger.sync_ids(control.registry.spaces());
        info!(space = %id, "search space removed");
        Ok(())
    }

    /// Forget all results without touching the data.
    pub fn reset_ledger(&self) -> SfResult<()> {
        let _control = self.control.lock();
        if self.state().is_active() {
            return Err(LifecycleError::Busy {
                operation: "reset the ledger".into(),
            }
            .into());
        }
        self.shared.ledger.reset();
        Ok(())
    }

    /// Write the current ledger to the local directory.
    pub fn save_ledger(&self) -> SfResult<()> {
        let fingerprint = {
            let control = self.control.lock();
            let data = control.data.as_ref().ok_or(LifecycleError::NoData)?;
            data.fingerprint.clone()
        };
        let persisted = PersistedLedger::from_snapshot(&self.snapshot(), fingerprint);
        self.store()?.save(&persisted)
    }

    /// Load a saved ledger if it was computed for the same problem type,
    /// fold count, score function and data. Returns whether anything was
    /// restored.
    pub fn restore_ledger(&self) -> SfResult<bool> {
        let control = self.control.lock();
        if self.state().is_active() {
            return Err(LifecycleError::Busy {
                operation: "restore the ledger".into(),
            }
            .into());
        }
        let data = control.data.as_ref().ok_or(LifecycleError::NoData)?;

        let Some(persisted) = self.store()?.load()? else {
            debug!("no saved ledger");
            return Ok(false);
        };
        if !persisted.is_compatible(&data.fingerprint) {
            info!(
                saved_at = %persisted.saved_at,
                "saved ledger does not match the loaded data, ignoring it"
            );
            return Ok(false);
        }

        let restored = self.shared.ledger.restore(&persisted);
        if self.config.ensemble_policy != EnsemblePolicy::Disabled {
            publish_ensemble(
                &self.shared.ledger,
                &self.ensembler,
                data.dataset.target(),
                &self.config.score_fn,
            );
        }
        info!(restored, saved_at = %persisted.saved_at, "ledger restored");
        Ok(true)
    }

    /// Test-set prediction of the best family or ensemble, if the data has
    /// test features and anything has been scored.
    pub fn best_test_prediction(&self) -> Option<Prediction> {
        let snapshot = self.snapshot();
        let (best_id, _) = snapshot.best()?;
        let prediction = if best_id == ENSEMBLE_ID {
            snapshot.ensemble.as_ref()?.test_prediction.as_ref()?
        } else {
            snapshot.get(best_id)?.test_prediction.as_ref()?
        };
        Some(Prediction::clone(prediction))
    }

    /// Predict new rows with the best family or ensemble. Needs fitted
    /// models, so it fails for entries restored from disk until the search
    /// finds something better.
    pub fn predict(&self, features: &[Vec<f64>]) -> SfResult<Prediction> {
        let snapshot = self.snapshot();
        let (best_id, _) = snapshot
            .best()
            .ok_or_else(|| SfError::Unavailable("no candidate has been scored yet".into()))?;

        if best_id != ENSEMBLE_ID {
            return entry_predict(&snapshot, best_id, features);
        }

        let ensemble = snapshot
            .ensemble
            .as_ref()
            .ok_or_else(|| SfError::Unavailable("ensemble vanished".into()))?;
        let predictions = ensemble
            .members
            .iter()
            .map(|id| entry_predict(&snapshot, id, features))
            .collect::<SfResult<Vec<_>>>()?;
        let refs: Vec<&Prediction> = predictions.iter().collect();
        Prediction::weighted_mean(&refs, &ensemble.weights)
            .ok_or_else(|| SfError::Unavailable("ensemble members disagree on prediction shape".into()))
    }

    fn store(&self) -> SfResult<LedgerStore> {
        match &self.store {
            Some(store) => Ok(store.clone()),
            None => LedgerStore::new(&self.config.local_dir),
        }
    }
}

fn entry_predict(snapshot: &LedgerSnapshot, id: &str, features: &[Vec<f64>]) -> SfResult<Prediction> {
    let entry = snapshot
        .get(id)
        .ok_or_else(|| SfError::Unavailable(format!("no ledger entry for '{id}'")))?;
    entry.predict(features).map_err(|err: ModelError| {
        SfError::Unavailable(format!("cannot predict with '{id}': {err}"))
    })
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("search thread panicked");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.interrupt();
        if let Some(handle) = self.control.get_mut().handle.take() {
            join_worker(handle);
        }
    }
}
