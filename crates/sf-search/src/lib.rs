//! # sf-search
//!
//! Search space definitions, eager validation of parameter rules, and the
//! random sampler that proposes one candidate per search round.

mod candidate;
mod registry;
mod sampler;
mod space;

pub use candidate::{Candidate, CandidateId};
pub use registry::SearchSpaceRegistry;
pub use sampler::{RandomSampler, Sampler};
pub use space::{ParameterGrid, ParameterRules, SearchSpace, ENSEMBLE_ID};
