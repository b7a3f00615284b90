use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::str::FromStr;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::query_builder::Separated;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;

use crate::fixtures::models::{MatchResult, Prediction, RoundId};
use crate::forecast::calibration::WeightProposal;

/// Rows per bulk INSERT, kept under SQLite's bind parameter limit.
const INSERT_CHUNK: usize = 150;

/// Fatal persistence failure. The enclosing transaction has been rolled back.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error while {action}: {source}")]
    Database {
        action: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("invalid {table} row {id}: {reason}")]
    InvalidRow {
        table: &'static str,
        id: i64,
        reason: String,
    },
}

fn db_err(action: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| StoreError::Database { action, source }
}

/// How a persist call went. Skipped records already existed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// A record with a natural key and a table to live in.
trait StoredRecord: Eq + Hash {
    const TABLE: &'static str;
    const COLUMNS: &'static str;

    /// Push `col = ? AND ...` over the natural key.
    fn push_key_filter(&self, qb: &mut QueryBuilder<'_, Sqlite>);

    fn push_row(&self, row: &mut Separated<'_, '_, Sqlite, &'static str>);
}

impl StoredRecord for Prediction {
    const TABLE: &'static str = "predictions";
    const COLUMNS: &'static str = "round_id, source, leftteam, rightteam, winner, margin";

    fn push_key_filter(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push("round_id = ")
            .push_bind(self.round_id)
            .push(" AND source = ")
            .push_bind(self.source.clone())
            .push(" AND leftteam = ")
            .push_bind(self.left_team.clone())
            .push(" AND rightteam = ")
            .push_bind(self.right_team.clone())
            .push(" AND winner = ")
            .push_bind(self.winner.clone())
            .push(" AND margin = ")
            .push_bind(self.margin);
    }

    fn push_row(&self, row: &mut Separated<'_, '_, Sqlite, &'static str>) {
        row.push_bind(self.round_id)
            .push_bind(self.source.clone())
            .push_bind(self.left_team.clone())
            .push_bind(self.right_team.clone())
            .push_bind(self.winner.clone())
            .push_bind(self.margin);
    }
}

impl StoredRecord for MatchResult {
    const TABLE: &'static str = "results";
    const COLUMNS: &'static str = "round_id, leftteam, rightteam, winner, margin";

    fn push_key_filter(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push("round_id = ")
            .push_bind(self.round_id)
            .push(" AND leftteam = ")
            .push_bind(self.left_team.clone())
            .push(" AND rightteam = ")
            .push_bind(self.right_team.clone())
            .push(" AND winner = ")
            .push_bind(self.winner.clone())
            .push(" AND margin = ")
            .push_bind(self.margin);
    }

    fn push_row(&self, row: &mut Separated<'_, '_, Sqlite, &'static str>) {
        row.push_bind(self.round_id)
            .push_bind(self.left_team.clone())
            .push_bind(self.right_team.clone())
            .push_bind(self.winner.clone())
            .push_bind(self.margin);
    }
}

#[derive(Debug, Clone, FromRow)]
struct PredictionRow {
    id: i64,
    round_id: i64,
    source: String,
    leftteam: String,
    rightteam: String,
    winner: String,
    margin: i64,
}

#[derive(Debug, Clone, FromRow)]
struct ResultRow {
    id: i64,
    round_id: i64,
    leftteam: String,
    rightteam: String,
    winner: String,
    margin: i64,
}

fn stored_margin(table: &'static str, id: i64, margin: i64) -> Result<u32, StoreError> {
    u32::try_from(margin).map_err(|_| StoreError::InvalidRow {
        table,
        id,
        reason: format!("margin {margin} out of range"),
    })
}

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn new(database_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{database_path}"))
            .context("Invalid database path")?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // Every connection to :memory: is its own database, so pin one.
        let pool_options = if database_path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let migration_sql = include_str!("../../migrations/001_init.sql");
        // Execute each statement separately (sqlx doesn't support multiple statements in one call)
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("Failed to execute migration: {trimmed}"))?;
            }
        }
        Ok(())
    }

    // --- Prediction and result recording ---

    /// Record source predictions, skipping any already stored.
    pub async fn persist_predictions(&self, predictions: &[Prediction]) -> Result<PersistOutcome, StoreError> {
        self.persist(predictions).await
    }

    /// Record completed-round results, skipping any already stored.
    pub async fn persist_results(&self, results: &[MatchResult]) -> Result<PersistOutcome, StoreError> {
        self.persist(results).await
    }

    /// Existence checks and the bulk insert share one transaction; any
    /// failure rolls the whole call back.
    async fn persist<R: StoredRecord>(&self, records: &[R]) -> Result<PersistOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err("opening transaction"))?;
        let mut seen: HashSet<&R> = HashSet::new();
        let mut fresh: Vec<&R> = Vec::new();
        let mut outcome = PersistOutcome::default();

        tracing::debug!(table = R::TABLE, records = records.len(), "Persisting records");

        for record in records {
            if !seen.insert(record) {
                outcome.skipped += 1;
                continue;
            }

            let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT id FROM {} WHERE ", R::TABLE));
            record.push_key_filter(&mut qb);
            let existing: Option<(i64,)> = qb
                .build_query_as()
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err("checking for an existing record"))?;

            match existing {
                Some((id,)) => {
                    tracing::debug!(table = R::TABLE, id, "Record already exists, skipping");
                    outcome.skipped += 1;
                }
                None => fresh.push(record),
            }
        }

        for chunk in fresh.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!("INSERT INTO {} ({}) ", R::TABLE, R::COLUMNS));
            qb.push_values(chunk, |mut row, record| record.push_row(&mut row));
            qb.build()
                .execute(&mut *tx)
                .await
                .map_err(db_err("inserting records"))?;
            outcome.inserted += chunk.len();
        }

        tx.commit().await.map_err(db_err("committing transaction"))?;

        tracing::info!(
            table = R::TABLE,
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            "Records persisted"
        );
        Ok(outcome)
    }

    pub async fn predictions_for_round(&self, round_id: RoundId) -> Result<Vec<Prediction>, StoreError> {
        let rows = sqlx::query_as::<_, PredictionRow>(
            "SELECT id, round_id, source, leftteam, rightteam, winner, margin
             FROM predictions WHERE round_id = ? ORDER BY id",
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("fetching predictions"))?;

        rows.into_iter()
            .map(|row| -> Result<Prediction, StoreError> {
                Ok(Prediction {
                    margin: stored_margin("predictions", row.id, row.margin)?,
                    round_id: row.round_id,
                    source: row.source,
                    left_team: row.leftteam,
                    right_team: row.rightteam,
                    winner: row.winner,
                })
            })
            .collect()
    }

    pub async fn results_for_round(&self, round_id: RoundId) -> Result<Vec<MatchResult>, StoreError> {
        let rows = sqlx::query_as::<_, ResultRow>(
            "SELECT id, round_id, leftteam, rightteam, winner, margin
             FROM results WHERE round_id = ? ORDER BY id",
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("fetching results"))?;

        rows.into_iter()
            .map(|row| -> Result<MatchResult, StoreError> {
                Ok(MatchResult {
                    margin: stored_margin("results", row.id, row.margin)?,
                    round_id: row.round_id,
                    left_team: row.leftteam,
                    right_team: row.rightteam,
                    winner: row.winner,
                })
            })
            .collect()
    }

    /// Get the number of stored rows in a record table.
    pub async fn count_rows(&self, table: RecordTable) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let row: (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("counting rows"))?;
        Ok(row.0)
    }

    // --- Source weights ---

    /// Weights saved by an explicit calibration apply, by source name.
    pub async fn load_weights(&self) -> Result<HashMap<String, Decimal>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT source, weight FROM source_weights")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("fetching source weights"))?;

        rows.into_iter()
            .map(|(source, weight)| -> Result<(String, Decimal), StoreError> {
                let parsed = Decimal::from_str(&weight).map_err(|e| StoreError::InvalidRow {
                    table: "source_weights",
                    id: 0,
                    reason: format!("weight '{weight}' for {source}: {e}"),
                })?;
                Ok((source, parsed))
            })
            .collect()
    }

    pub async fn save_weights(
        &self,
        proposals: &[WeightProposal],
        calibrated_round: RoundId,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err("opening transaction"))?;
        for proposal in proposals {
            sqlx::query(
                "INSERT INTO source_weights (source, weight, calibrated_round) VALUES (?, ?, ?)
                 ON CONFLICT(source) DO UPDATE SET
                    weight = excluded.weight,
                    calibrated_round = excluded.calibrated_round,
                    updated_at = datetime('now')",
            )
            .bind(&proposal.source)
            .bind(proposal.proposed.to_string())
            .bind(calibrated_round)
            .execute(&mut *tx)
            .await
            .map_err(db_err("saving source weight"))?;
        }
        tx.commit().await.map_err(db_err("committing transaction"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTable {
    Predictions,
    Results,
}

impl RecordTable {
    fn name(self) -> &'static str {
        match self {
            Self::Predictions => "predictions",
            Self::Results => "results",
        }
    }
}
