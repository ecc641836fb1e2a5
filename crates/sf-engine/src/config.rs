use crossbeam_channel::Sender;
use sf_search::{SearchSpace, SearchSpaceRegistry};
use sf_types::{ConfigError, ProblemType, ScoreFunction};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ensemble::{BlendStrategy, EnsemblePolicy, UniformBlend};
use crate::events::EngineEvent;

pub const DEFAULT_FOLDS: usize = 5;

/// Everything an [`Engine`](crate::Engine) needs, fixed at construction.
#[derive(Clone)]
pub struct EngineConfig {
    pub problem_type: ProblemType,
    pub local_dir: PathBuf,
    pub score_fn: ScoreFunction,
    pub search_spaces: Vec<SearchSpace>,
    pub n_folds: usize,
    /// Seed for fold assignment and sampling. `None` draws from entropy.
    pub seed: Option<u64>,
    pub ensemble_policy: EnsemblePolicy,
    pub blend_strategy: Arc<dyn BlendStrategy>,
    pub parallel_folds: bool,
    /// Save the ledger to `local_dir` after improvements and on stop.
    pub persistence: bool,
    pub events: Option<Sender<EngineEvent>>,
}

impl EngineConfig {
    pub fn new(local_dir: impl AsRef<Path>, problem_type: ProblemType, score_fn: ScoreFunction) -> Self {
        Self {
            problem_type,
            local_dir: local_dir.as_ref().to_path_buf(),
            score_fn,
            search_spaces: Vec::new(),
            n_folds: DEFAULT_FOLDS,
            seed: None,
            ensemble_policy: EnsemblePolicy::default(),
            blend_strategy: Arc::new(UniformBlend),
            parallel_folds: true,
            persistence: false,
            events: None,
        }
    }

    pub fn with_search_space(mut self, space: SearchSpace) -> Self {
        self.search_spaces.push(space);
        self
    }

    pub fn with_folds(mut self, n_folds: usize) -> Self {
        self.n_folds = n_folds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_ensemble_policy(mut self, policy: EnsemblePolicy) -> Self {
        self.ensemble_policy = policy;
        self
    }

    pub fn with_blend_strategy(mut self, strategy: Arc<dyn BlendStrategy>) -> Self {
        self.blend_strategy = strategy;
        self
    }

    pub fn with_parallel_folds(mut self, parallel: bool) -> Self {
        self.parallel_folds = parallel;
        self
    }

    pub fn with_persistence(mut self, enabled: bool) -> Self {
        self.persistence = enabled;
        self
    }

    pub fn with_event_sender(mut self, sender: Sender<EngineEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Validate the whole configuration and build the registry from it.
    pub fn validate(&self) -> Result<SearchSpaceRegistry, ConfigError> {
        if self.n_folds < 2 {
            return Err(ConfigError::InvalidFolds {
                n_folds: self.n_folds,
            });
        }
        if self.search_spaces.is_empty() {
            return Err(ConfigError::NoSearchSpaces);
        }
        for space in &self.search_spaces {
            check_supported(space, self.problem_type)?;
        }
        SearchSpaceRegistry::from_spaces(self.search_spaces.iter().cloned())
    }
}

pub(crate) fn check_supported(space: &SearchSpace, problem_type: ProblemType) -> Result<(), ConfigError> {
    if space.family().supports(problem_type) {
        Ok(())
    } else {
        Err(ConfigError::UnsupportedProblemType {
            id: space.id().to_string(),
            problem_type: problem_type.to_string(),
        })
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("problem_type", &self.problem_type)
            .field("local_dir", &self.local_dir)
            .field("score_fn", &self.score_fn)
            .field("search_spaces", &self.search_spaces.iter().map(SearchSpace::id).collect::<Vec<_>>())
            .field("n_folds", &self.n_folds)
            .field("seed", &self.seed)
            .field("ensemble_policy", &self.ensemble_policy)
            .field("blend_strategy", &self.blend_strategy.name())
            .field("parallel_folds", &self.parallel_folds)
            .field("persistence", &self.persistence)
            .finish_non_exhaustive()
    }
}
