//! # sf-engine
//!
//! An interruptible hyperparameter search engine. Once started it keeps
//! sampling candidates from every registered search space, cross-validates
//! them, and tracks the best result per family plus an ensemble of the
//! family bests, until the caller interrupts it. Status can be requested from
//! any thread while the search runs.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sf_engine::{Engine, EngineConfig};
//! use sf_search::SearchSpace;
//! use sf_types::{Dataset, ProblemType, ScoreFunction};
//! # fn family() -> Arc<dyn sf_types::ModelFamily> { unimplemented!() }
//! # fn auc(_: &[f64], _: &sf_types::Prediction) -> f64 { 0.5 }
//! # fn main() -> sf_types::SfResult<()> {
//! let config = EngineConfig::new("./sifter", ProblemType::Classification, ScoreFunction::new("roc_auc", auc))
//!     .with_search_space(SearchSpace::new("lr", family()).add_values("C", [0.1, 1.0, 10.0]));
//! let engine = Engine::new(config)?;
//! engine.load_data(Dataset::new(vec![vec![0.0], vec![1.0]], vec![0.0, 1.0], None)?)?;
//! engine.restart()?;
//! std::thread::sleep(Duration::from_secs(5));
//! engine.interrupt();
//! engine.wait_until_stopped(Duration::from_secs(60));
//! println!("{:?}", engine.request_status().scores);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cv;
pub mod engine;
pub mod ensemble;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod status;
pub mod storage;
mod worker;

pub use config::{EngineConfig, DEFAULT_FOLDS};
pub use cv::{CrossValidator, EvaluationResult, Folds};
pub use engine::Engine;
pub use ensemble::{
    BlendStrategy, EnsemblePolicy, EnsembleState, Ensembler, ScoreWeightedBlend, UniformBlend,
};
pub use events::EngineEvent;
pub use ledger::{LedgerEntry, LedgerSnapshot, ScoreLedger};
pub use lifecycle::LifecycleState;
pub use status::{EngineStatus, EnsembleStatus, FamilyStatus};
pub use storage::{LedgerFingerprint, LedgerStore, PersistedEntry, PersistedLedger};
