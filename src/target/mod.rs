//! The competition site predictions are submitted to.
//!
//! The target is authoritative for fixtures and results and receives the
//! final forecast. Access goes through the traits here so the engine does
//! not care how the target is reached.

pub mod file;
pub mod submission;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::Failure;
use crate::fixtures::models::{Fixture, MatchResult, RoundId};
use crate::target::submission::Submission;

/// Records read from the target plus rows that failed to parse.
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    pub malformed: Vec<Failure>,
}

impl<T> Default for Parsed<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            malformed: Vec::new(),
        }
    }
}

#[async_trait]
pub trait FixtureProvider: Send + Sync {
    /// Canonical fixtures for a round, in the target's order.
    async fn fixtures(&self, round_id: RoundId) -> Result<Parsed<Fixture>>;
}

#[async_trait]
pub trait ResultProvider: Send + Sync {
    /// Outcomes of a completed round.
    async fn results(&self, round_id: RoundId) -> Result<Parsed<MatchResult>>;
}

#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn submit(&self, submission: &Submission) -> Result<()>;
}
