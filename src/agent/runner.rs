use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AggregationConfig, AppConfig, Secrets};
use crate::data::SourceRegistry;
use crate::db::store::{PersistOutcome, Store};
use crate::error::Failures;
use crate::fixtures::models::RoundId;
use crate::forecast::aggregate::{aggregate, AggregateForecast};
use crate::forecast::calibration::{calibrate, propose_weights, CalibrationReport, WeightProposal};
use crate::forecast::reconcile::reconcile;
use crate::target::file::FileTarget;
use crate::target::submission::{build_submission, Submission};
use crate::target::{FixtureProvider, ResultProvider, SubmissionSink};

/// Summary of one forecasting run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub round_id: RoundId,
    pub forecast: AggregateForecast,
    pub submission: Submission,
    pub persisted: PersistOutcome,
    #[serde(serialize_with = "serialize_failures")]
    pub failures: Failures,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsReport {
    pub round_id: RoundId,
    pub results: usize,
    pub persisted: PersistOutcome,
    #[serde(serialize_with = "serialize_failures")]
    pub failures: Failures,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationRun {
    pub report: CalibrationReport,
    pub proposals: Vec<WeightProposal>,
    pub applied: bool,
}

fn serialize_failures<S: serde::Serializer>(failures: &Failures, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(failures.iter().map(|f| f.to_string()))
}

pub struct Runner {
    aggregation: AggregationConfig,
    store: Store,
    registry: SourceRegistry,
    fixtures: Arc<dyn FixtureProvider>,
    results: Arc<dyn ResultProvider>,
    sink: Arc<dyn SubmissionSink>,
}

impl Runner {
    pub fn new(
        aggregation: AggregationConfig,
        store: Store,
        registry: SourceRegistry,
        fixtures: Arc<dyn FixtureProvider>,
        results: Arc<dyn ResultProvider>,
        sink: Arc<dyn SubmissionSink>,
    ) -> Self {
        Self {
            aggregation,
            store,
            registry,
            fixtures,
            results,
            sink,
        }
    }

    /// Wire up the store, configured sources and the file target.
    pub async fn from_config(config: &AppConfig, secrets: &Secrets) -> Result<Self> {
        let store = Store::new(&config.database.path).await?;
        let mut registry = SourceRegistry::from_config(&config.sources, secrets)?;
        if registry.is_empty() {
            warn!("No prediction sources configured");
        }

        if config.aggregation.use_stored_weights {
            let stored = store
                .load_weights()
                .await
                .context("Failed to load stored source weights")?;
            registry.apply_weights(&stored);
        }

        let target = Arc::new(FileTarget::new(
            config.target.data_dir.clone(),
            config.target.require_all_picks,
        ));

        info!(
            database = %config.database.path,
            sources = registry.len(),
            conflict_policy = ?config.aggregation.conflict_policy,
            "Runner initialized"
        );

        Ok(Self::new(
            config.aggregation.clone(),
            store,
            registry,
            target.clone(),
            target.clone(),
            target,
        ))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Fetch, persist, aggregate and submit predictions for `round_id`.
    ///
    /// Per-source and per-record problems are collected into the report.
    /// Missing fixtures, a failed persist or a rejected submission abort the run.
    pub async fn run_round(&self, round_id: RoundId) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, round_id);
        self.forecast_round(run_id, round_id).instrument(span).await
    }

    async fn forecast_round(&self, run_id: Uuid, round_id: RoundId) -> Result<RunReport> {
        let start = Instant::now();
        info!(sources = self.registry.len(), "Starting run");
        let mut failures = Failures::new();

        let fixtures = self
            .fixtures
            .fixtures(round_id)
            .await
            .with_context(|| format!("Failed to load fixtures for round {round_id}"))?;
        failures.extend(fixtures.malformed);
        let fixtures = fixtures.records;
        if fixtures.is_empty() {
            bail!("No usable fixtures for round {round_id}");
        }
        info!(fixtures = fixtures.len(), "Fixtures loaded");

        let fetched = self.registry.fetch_all(round_id).await;
        let fetched_count = fetched.all_predictions().count();
        failures.extend(fetched.failures);

        let reconciled = reconcile(&fetched.sources, &fixtures);
        failures.extend(reconciled.dropped);

        let persisted = self
            .store
            .persist_predictions(&reconciled.raw)
            .await
            .context("Failed to persist predictions")?;
        info!(
            fetched = fetched_count,
            inserted = persisted.inserted,
            skipped = persisted.skipped,
            "Raw predictions persisted"
        );

        let aggregation = aggregate(&reconciled.sources, self.aggregation.conflict_policy);
        failures.extend(aggregation.conflicts);
        let forecast = aggregation.forecast;

        let submission = build_submission(round_id, &forecast, &fixtures);
        self.sink
            .submit(&submission)
            .await
            .with_context(|| format!("Failed to submit round {round_id}"))?;

        if !failures.is_empty() {
            warn!(count = failures.len(), errors = %failures, "Run finished with failures");
        }
        info!(
            forecast = forecast.len(),
            picks = submission.picks.len(),
            missing = submission.missing.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Run complete"
        );

        Ok(RunReport {
            run_id,
            round_id,
            forecast,
            submission,
            persisted,
            failures,
        })
    }

    /// Fetch and persist the outcomes of a completed round.
    pub async fn record_results(&self, round_id: RoundId) -> Result<ResultsReport> {
        let span = info_span!("results", run_id = %Uuid::new_v4(), round_id);
        async {
            let parsed = self
                .results
                .results(round_id)
                .await
                .with_context(|| format!("Failed to load results for round {round_id}"))?;

            let persisted = self
                .store
                .persist_results(&parsed.records)
                .await
                .context("Failed to persist results")?;
            info!(
                results = parsed.records.len(),
                inserted = persisted.inserted,
                skipped = persisted.skipped,
                "Results recorded"
            );

            Ok::<_, anyhow::Error>(ResultsReport {
                round_id,
                results: parsed.records.len(),
                persisted,
                failures: Failures::from(parsed.malformed),
            })
        }
        .instrument(span)
        .await
    }

    /// Score stored predictions for a completed round against its stored results.
    ///
    /// Proposed weights are only written when `apply` is set.
    pub async fn calibrate(&self, round_id: RoundId, apply: bool) -> Result<CalibrationRun> {
        let span = info_span!("calibrate", run_id = %Uuid::new_v4(), round_id);
        async {
            let predictions = self.store.predictions_for_round(round_id).await?;
            let results = self.store.results_for_round(round_id).await?;
            if results.is_empty() {
                warn!("No stored results; every prediction will be unmatched");
            }

            let report = calibrate(round_id, &predictions, &results);
            for accuracy in &report.sources {
                info!(
                    source = %accuracy.source,
                    predictions = accuracy.predictions,
                    hits = accuracy.hits,
                    misses = accuracy.misses,
                    unmatched = accuracy.unmatched,
                    mean_margin_error_pct = ?accuracy.mean_margin_error_pct,
                    "Source accuracy"
                );
            }

            let proposals = propose_weights(&report, &self.registry.sources());
            for proposal in proposals.iter().filter(|p| p.changed()) {
                info!(
                    source = %proposal.source,
                    current = %proposal.current,
                    proposed = %proposal.proposed,
                    "Weight change proposed"
                );
            }

            if apply {
                self.store
                    .save_weights(&proposals, round_id)
                    .await
                    .context("Failed to save source weights")?;
                info!(sources = proposals.len(), "Source weights saved");
            }

            Ok::<_, anyhow::Error>(CalibrationRun {
                report,
                proposals,
                applied: apply,
            })
        }
        .instrument(span)
        .await
    }
}
