//! Non-fatal failures collected over a run.
//!
//! Per-record and per-source problems never abort a run. They are gathered
//! into a [`Failures`] list and reported alongside whatever partial result
//! was produced. Fatal persistence errors live in [`crate::db::store::StoreError`].

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// A prediction's team name matched no fixture in the round.
    #[error("unresolved team name '{name}' from source {source_name}")]
    UnresolvedTeamName { source_name: String, name: String },

    /// A zero-weight source claimed a winner that already had a forecast.
    #[error(
        "zero-weight source {source_name} collided on winner '{winner}': kept {kept}, ignored {ignored}"
    )]
    AmbiguousAggregation {
        source_name: String,
        winner: String,
        kept: u32,
        ignored: u32,
    },

    #[error("source {source_name} failed: {reason}")]
    SourceRetrieval { source_name: String, reason: String },

    /// A field from upstream could not be parsed or violated a record invariant.
    #[error("malformed {field} '{value}' from {origin}: {reason}")]
    MalformedRecord {
        origin: String,
        field: String,
        value: String,
        reason: String,
    },
}

impl Failure {
    pub fn malformed(
        origin: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedRecord {
            origin: origin.into(),
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnresolvedTeamName { .. } => "unresolved_team_name",
            Self::AmbiguousAggregation { .. } => "ambiguous_aggregation",
            Self::SourceRetrieval { .. } => "source_retrieval",
            Self::MalformedRecord { .. } => "malformed_record",
        }
    }
}

/// Every failure seen during a run, in the order encountered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Failures(Vec<Failure>);

impl Failures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, failure: Failure) {
        self.0.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Failure> {
        self.0.iter()
    }

    /// `None` when nothing went wrong, so callers can treat it like an error value.
    pub fn into_error(self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl Extend<Failure> for Failures {
    fn extend<T: IntoIterator<Item = Failure>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl From<Vec<Failure>> for Failures {
    fn from(failures: Vec<Failure>) -> Self {
        Self(failures)
    }
}

impl IntoIterator for Failures {
    type Item = Failure;
    type IntoIter = std::vec::IntoIter<Failure>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Failures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure(s)", self.0.len())?;
        for (idx, failure) in self.0.iter().enumerate() {
            let sep = if idx == 0 { ": " } else { "; " };
            write!(f, "{sep}{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Failures {}
