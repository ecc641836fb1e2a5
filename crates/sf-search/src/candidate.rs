//! Candidates: one concrete, repaired parameter assignment per round.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sf_types::Parameters;
use uuid::Uuid;

/// Unique candidate identifier.
pub type CandidateId = Uuid;

/// A sampled parameter assignment awaiting evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub space_id: String,
    /// Round number within the owning search space.
    pub round: u64,
    pub parameters: Parameters,
    pub sampled_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(space_id: impl Into<String>, round: u64, parameters: Parameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            space_id: space_id.into(),
            round,
            parameters,
            sampled_at: Utc::now(),
        }
    }
}
