//! A target kept on the local filesystem.
//!
//! Layout under the data directory:
//!
//! ```text
//! fixtures/<round>.json     [{"id", "left_team", "right_team", "left_team_id", "right_team_id"}]
//! results/<round>.json      [{"left_team", "right_team", "winner", "margin"}]
//! submissions/<round>.json  written by `submit`
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::Failure;
use crate::fixtures::models::{Fixture, MatchResult, RoundId};
use crate::target::submission::Submission;
use crate::target::{FixtureProvider, Parsed, ResultProvider, SubmissionSink};

#[derive(Debug, Deserialize)]
struct RawFixture {
    id: Value,
    left_team: String,
    right_team: String,
    left_team_id: Value,
    right_team_id: Value,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    left_team: String,
    right_team: String,
    winner: String,
    margin: Value,
}

pub struct FileTarget {
    data_dir: PathBuf,
    require_all_picks: bool,
}

impl FileTarget {
    pub fn new(data_dir: impl Into<PathBuf>, require_all_picks: bool) -> Self {
        Self {
            data_dir: data_dir.into(),
            require_all_picks,
        }
    }

    fn round_file(&self, kind: &str, round_id: RoundId) -> PathBuf {
        self.data_dir.join(kind).join(format!("{round_id}.json"))
    }

    async fn read_rows<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<(String, Result<T, Failure>)>> {
        let body = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let rows: Vec<Value> = serde_json::from_str(&body)
            .with_context(|| format!("{} is not a JSON array", path.display()))?;

        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(idx, row)| {
                let origin = format!("{} row {idx}", path.display());
                let parsed = serde_json::from_value::<T>(row.clone()).map_err(|e| {
                    Failure::malformed(origin.as_str(), "row", row.to_string(), e.to_string())
                });
                (origin, parsed)
            })
            .collect())
    }
}

/// Ids and team ids are opaque; accept either a JSON string or an integer.
fn opaque_id(origin: &str, field: &str, value: &Value) -> Result<String, Failure> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        other => Err(Failure::malformed(origin, field, other.to_string(), "not an id")),
    }
}

fn margin(origin: &str, value: &Value) -> Result<u32, Failure> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Failure::malformed(origin, "margin", value.to_string(), "not a non-negative integer"))
}

#[async_trait]
impl FixtureProvider for FileTarget {
    async fn fixtures(&self, round_id: RoundId) -> Result<Parsed<Fixture>> {
        let path = self.round_file("fixtures", round_id);
        let mut parsed = Parsed::default();
        let mut ids: HashSet<String> = HashSet::new();
        let mut pairs: HashSet<(String, String)> = HashSet::new();

        for (origin, row) in self.read_rows::<RawFixture>(&path).await? {
            let fixture = row
                .and_then(|raw| {
                    Fixture::new(
                        opaque_id(&origin, "id", &raw.id)?,
                        &raw.left_team,
                        &raw.right_team,
                        opaque_id(&origin, "left_team_id", &raw.left_team_id)?,
                        opaque_id(&origin, "right_team_id", &raw.right_team_id)?,
                    )
                })
                .and_then(|fixture| {
                    // One fixture per id and per team pair, whichever side is home.
                    let pair = if fixture.left_team <= fixture.right_team {
                        (fixture.left_team.clone(), fixture.right_team.clone())
                    } else {
                        (fixture.right_team.clone(), fixture.left_team.clone())
                    };
                    if ids.contains(&fixture.id) {
                        return Err(Failure::malformed(
                            origin.as_str(),
                            "id",
                            fixture.id,
                            "fixture id already used this round",
                        ));
                    }
                    if pairs.contains(&pair) {
                        return Err(Failure::malformed(
                            origin.as_str(),
                            "team",
                            format!("{} v {}", fixture.left_team, fixture.right_team),
                            "team pair already has a fixture this round",
                        ));
                    }
                    ids.insert(fixture.id.clone());
                    pairs.insert(pair);
                    Ok(fixture)
                });
            match fixture {
                Ok(fixture) => parsed.records.push(fixture),
                Err(failure) => {
                    warn!(%failure, "Skipping fixture row");
                    parsed.malformed.push(failure);
                }
            }
        }

        Ok(parsed)
    }
}

#[async_trait]
impl ResultProvider for FileTarget {
    async fn results(&self, round_id: RoundId) -> Result<Parsed<MatchResult>> {
        let path = self.round_file("results", round_id);
        let mut parsed = Parsed::default();

        for (origin, row) in self.read_rows::<RawResult>(&path).await? {
            let result = row.and_then(|raw| {
                MatchResult::new(
                    round_id,
                    &raw.left_team,
                    &raw.right_team,
                    &raw.winner,
                    margin(&origin, &raw.margin)?,
                )
            });
            match result {
                Ok(result) => parsed.records.push(result),
                Err(failure) => {
                    warn!(%failure, "Skipping result row");
                    parsed.malformed.push(failure);
                }
            }
        }

        Ok(parsed)
    }
}

#[async_trait]
impl SubmissionSink for FileTarget {
    async fn submit(&self, submission: &Submission) -> Result<()> {
        if self.require_all_picks && !submission.is_complete() {
            bail!(
                "Refusing to submit round {}: no pick for fixtures {}",
                submission.round_id,
                submission.missing.join(", ")
            );
        }

        let path = self.round_file("submissions", submission.round_id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let body = serde_json::to_string_pretty(submission)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!(
            round_id = submission.round_id,
            picks = submission.picks.len(),
            missing = submission.missing.len(),
            path = %path.display(),
            "Submission written"
        );
        Ok(())
    }
}
