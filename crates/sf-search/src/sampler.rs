//! Parameter sampling strategies.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sf_types::{ConfigError, Parameters};
use tracing::trace;

use crate::candidate::Candidate;
use crate::space::{ParameterGrid, SearchSpace};

/// Common trait for sampling strategies.
pub trait Sampler: Send {
    /// Propose a repaired candidate for the given space.
    fn sample(&mut self, space: &SearchSpace, round: u64) -> Result<Candidate, ConfigError>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Independent uniform sampling of every grid parameter, with replacement
/// across rounds.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    rng: ChaCha8Rng,
}

impl RandomSampler {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Raw draw from the grid, before any rules run.
    pub fn draw(&mut self, grid: &ParameterGrid) -> Parameters {
        let mut parameters = Parameters::new();
        for (name, values) in grid.iter() {
            if values.is_empty() {
                continue;
            }
            let idx = self.rng.random_range(0..values.len());
            parameters.insert(name, values[idx].clone());
        }
        parameters
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, space: &SearchSpace, round: u64) -> Result<Candidate, ConfigError> {
        let mut parameters = self.draw(space.grid());
        space.repair(&mut parameters)?;
        trace!(space = %space.id(), round, %parameters, "sampled candidate");
        Ok(Candidate::new(space.id(), round, parameters))
    }

    fn name(&self) -> &str {
        "random"
    }
}
