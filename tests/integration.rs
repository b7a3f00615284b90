//! End-to-end runs over file-backed sources and target with an in-memory store.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use margin_consensus::agent::runner::Runner;
use margin_consensus::config::{AggregationConfig, SourceConfig, SourceKind};
use margin_consensus::data::feed::{FeedSource, FileSource, RowFormat};
use margin_consensus::data::{Source, SourcePredictor, SourceRegistry};
use margin_consensus::db::store::{RecordTable, Store};
use margin_consensus::error::Failure;
use margin_consensus::forecast::aggregate::ConflictPolicy;
use margin_consensus::target::file::FileTarget;

// ──────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────

/// Temporary data directory, removed when the test ends (pass or fail).
struct ScratchDir(PathBuf);

impl Deref for ScratchDir {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

async fn scratch_dir() -> ScratchDir {
    let dir = std::env::temp_dir().join(format!("margin-e2e-{}", uuid::Uuid::new_v4()));
    for sub in ["fixtures", "results", "sources"] {
        tokio::fs::create_dir_all(dir.join(sub)).await.unwrap();
    }
    ScratchDir(dir)
}

async fn write_json(path: &Path, value: Value) {
    tokio::fs::write(path, serde_json::to_string(&value).unwrap())
        .await
        .unwrap();
}

fn source_config(name: &str, weight: Decimal, kind: SourceKind, location: String) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        tournament: "super-rugby".to_string(),
        weight,
        kind,
        location,
        format: RowFormat::Signed,
        round_offset: 0,
        api_key_env: None,
        api_key_header: "x-api-key".to_string(),
    }
}

fn file_source(dir: &Path, name: &str, weight: Decimal) -> (Source, Arc<dyn SourcePredictor>) {
    let location = dir
        .join("sources")
        .join(format!("{name}-{{round}}.json"))
        .display()
        .to_string();
    let config = source_config(name, weight, SourceKind::File, location);
    (
        Source::new(name, "super-rugby", weight),
        Arc::new(FileSource::new(&config)),
    )
}

async fn seed_round(dir: &Path) {
    write_json(
        &dir.join("fixtures/5.json"),
        json!([
            {"id": "t1", "left_team": "Chiefs", "right_team": "Blues", "left_team_id": 1, "right_team_id": 2},
            {"id": "t2", "left_team": "Reds", "right_team": "Brumbies", "left_team_id": 3, "right_team_id": 4},
            {"id": "t3", "left_team": "Force", "right_team": "Rebels", "left_team_id": 5, "right_team_id": 6}
        ]),
    )
    .await;
    write_json(
        &dir.join("sources/alpha-5.json"),
        json!([
            {"left_team": "Chiefs", "right_team": "Blues", "margin": 10},
            {"left_team": "Reds", "right_team": "Brumbies", "margin": -7}
        ]),
    )
    .await;
    write_json(
        &dir.join("sources/beta-5.json"),
        json!([
            {"left_team": "The Chiefs", "right_team": "Blues", "margin": 6},
            {"left_team": "Force", "right_team": "Rebels", "margin": "abc"}
        ]),
    )
    .await;
}

async fn runner(dir: &Path) -> Runner {
    let store = Store::new(":memory:").await.unwrap();
    let mut registry = SourceRegistry::new(2);
    let (source, predictor) = file_source(dir, "alpha", dec!(0.5));
    registry.register(source, predictor);
    let (source, predictor) = file_source(dir, "beta", dec!(0.5));
    registry.register(source, predictor);

    let target = Arc::new(FileTarget::new(dir, false));
    Runner::new(
        AggregationConfig {
            conflict_policy: ConflictPolicy::FirstWins,
            use_stored_weights: false,
        },
        store,
        registry,
        target.clone(),
        target.clone(),
        target,
    )
}

// ──────────────────────────────────────────
// Forecast runs
// ──────────────────────────────────────────

#[tokio::test]
async fn run_round_aggregates_and_submits() {
    let dir = scratch_dir().await;
    seed_round(&dir).await;
    let runner = runner(&dir).await;

    let report = runner.run_round(5).await.unwrap();

    // chiefs: round(10 * 0.5) + round(6 * 0.5); brumbies: round(7 * 0.5)
    assert_eq!(report.forecast.get("chiefs"), Some(8));
    assert_eq!(report.forecast.get("brumbies"), Some(4));
    assert_eq!(report.forecast.len(), 2);

    assert_eq!(report.persisted.inserted, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures.iter().next().unwrap().kind(), "malformed_record");

    let picks = &report.submission.picks;
    assert_eq!(picks.len(), 2);
    assert_eq!(picks[0].fixture_id, "t1");
    assert_eq!(picks[0].winner_team_id.as_deref(), Some("1"));
    assert_eq!(picks[0].margin, 8);
    assert_eq!(picks[1].winner_team_id.as_deref(), Some("4"));
    assert_eq!(report.submission.missing, vec!["t3".to_string()]);

    let written: Value = serde_json::from_str(
        &tokio::fs::read_to_string(dir.join("submissions/5.json")).await.unwrap(),
    )
    .unwrap();
    assert_eq!(written["picks"][1]["margin"], 4);
}

#[tokio::test]
async fn rerun_does_not_duplicate_predictions() {
    let dir = scratch_dir().await;
    seed_round(&dir).await;
    let runner = runner(&dir).await;

    runner.run_round(5).await.unwrap();
    let again = runner.run_round(5).await.unwrap();

    assert_eq!(again.persisted.inserted, 0);
    assert_eq!(again.persisted.skipped, 3);
    assert_eq!(runner.store().count_rows(RecordTable::Predictions).await.unwrap(), 3);
    assert_ne!(again.forecast.get("chiefs"), None);
}

#[tokio::test]
async fn repeat_prediction_for_a_fixture_is_stored_once() {
    let dir = scratch_dir().await;
    seed_round(&dir).await;
    write_json(
        &dir.join("sources/alpha-5.json"),
        json!([
            {"left_team": "Chiefs", "right_team": "Blues", "margin": 7},
            {"left_team": "Chiefs", "right_team": "Blues", "margin": 9},
            {"left_team": "Reds", "right_team": "Brumbies", "margin": -7}
        ]),
    )
    .await;
    write_json(
        &dir.join("results/5.json"),
        json!([
            {"left_team": "Chiefs", "right_team": "Blues", "winner": "Chiefs", "margin": 10}
        ]),
    )
    .await;
    let runner = runner(&dir).await;

    let report = runner.run_round(5).await.unwrap();
    // round(7 * 0.5) + round(6 * 0.5); the second alpha row is ignored
    assert_eq!(report.forecast.get("chiefs"), Some(7));
    assert_eq!(report.persisted.inserted, 3);
    assert_eq!(runner.store().count_rows(RecordTable::Predictions).await.unwrap(), 3);
    assert!(report
        .failures
        .iter()
        .any(|f| matches!(f, Failure::MalformedRecord { field, .. } if field == "fixture")));

    let stored = runner.store().predictions_for_round(5).await.unwrap();
    let alpha_chiefs: Vec<u32> = stored
        .iter()
        .filter(|p| p.source == "alpha" && p.winner == "chiefs")
        .map(|p| p.margin)
        .collect();
    assert_eq!(alpha_chiefs, vec![7]);

    runner.record_results(5).await.unwrap();
    let calibration = runner.calibrate(5, false).await.unwrap();
    let alpha = calibration.report.for_source("alpha").unwrap();
    assert_eq!(alpha.predictions, 2);
    assert_eq!(alpha.hits, 1);
    assert_eq!(alpha.unmatched, 1);
}

#[tokio::test]
async fn missing_source_file_is_collected_not_fatal() {
    let dir = scratch_dir().await;
    seed_round(&dir).await;
    tokio::fs::remove_file(dir.join("sources/beta-5.json")).await.unwrap();
    let runner = runner(&dir).await;

    let report = runner.run_round(5).await.unwrap();
    assert_eq!(report.forecast.get("chiefs"), Some(5));
    assert!(report
        .failures
        .iter()
        .any(|f| f.kind() == "source_retrieval"));
}

#[tokio::test]
async fn run_without_fixtures_aborts() {
    let dir = scratch_dir().await;
    write_json(&dir.join("fixtures/5.json"), json!([])).await;
    let runner = runner(&dir).await;

    assert!(runner.run_round(5).await.is_err());
    assert_eq!(runner.store().count_rows(RecordTable::Predictions).await.unwrap(), 0);
}

// ──────────────────────────────────────────
// Results and calibration
// ──────────────────────────────────────────

#[tokio::test]
async fn results_then_calibration_rewards_accurate_source() {
    let dir = scratch_dir().await;
    seed_round(&dir).await;
    write_json(
        &dir.join("results/5.json"),
        json!([
            {"left_team": "Chiefs", "right_team": "Blues", "winner": "Chiefs", "margin": 12},
            {"left_team": "Reds", "right_team": "Brumbies", "winner": "Reds", "margin": 3},
            {"left_team": "Force", "right_team": "Rebels", "winner": "draw", "margin": 0}
        ]),
    )
    .await;
    let runner = runner(&dir).await;
    runner.run_round(5).await.unwrap();

    let recorded = runner.record_results(5).await.unwrap();
    assert_eq!(recorded.persisted.inserted, 3);
    assert!(recorded.failures.is_empty());
    let again = runner.record_results(5).await.unwrap();
    assert_eq!(again.persisted.inserted, 0);

    let dry = runner.calibrate(5, false).await.unwrap();
    assert!(!dry.applied);
    assert!(runner.store().load_weights().await.unwrap().is_empty());

    let alpha = dry.report.for_source("alpha").unwrap();
    assert_eq!((alpha.hits, alpha.misses), (1, 1));
    assert_eq!(alpha.mean_margin_error_pct, Some(dec!(16.67)));
    let beta = dry.report.for_source("beta").unwrap();
    assert_eq!((beta.hits, beta.misses), (1, 0));
    assert_eq!(beta.mean_margin_error_pct, Some(dec!(50)));

    let applied = runner.calibrate(5, true).await.unwrap();
    assert!(applied.applied);
    let stored = runner.store().load_weights().await.unwrap();
    let alpha_weight = stored["alpha"];
    let beta_weight = stored["beta"];
    assert!(beta_weight > alpha_weight);
    assert!((alpha_weight + beta_weight - Decimal::ONE).abs() <= dec!(0.0001));
}

// ──────────────────────────────────────────
// HTTP feed
// ──────────────────────────────────────────

#[tokio::test]
async fn feed_source_fetches_with_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rounds/7"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"left_team": "Hurricanes", "right_team": "Highlanders", "margin": "+9"},
            {"left_team": "Crusaders", "right_team": "Drua", "margin": -2}
        ])))
        .mount(&server)
        .await;

    let mut config = source_config(
        "vision",
        dec!(0.6),
        SourceKind::Feed,
        format!("{}/rounds/{{round}}", server.uri()),
    );
    config.round_offset = 2;
    let feed = FeedSource::new(
        reqwest::Client::new(),
        &config,
        Some(SecretString::from("secret".to_string())),
    )
    .unwrap();

    let batch = feed.fetch(5).await.unwrap();
    assert!(batch.malformed.is_empty());
    assert_eq!(batch.predictions.len(), 2);
    assert_eq!(batch.predictions[0].winner, "hurricanes");
    assert_eq!(batch.predictions[0].margin, 9);
    assert_eq!(batch.predictions[1].winner, "drua");
    assert!(batch.predictions.iter().all(|p| p.round_id == 5));
}

#[tokio::test]
async fn feed_error_status_becomes_retrieval_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = source_config(
        "vision",
        dec!(0.6),
        SourceKind::Feed,
        format!("{}/rounds/{{round}}", server.uri()),
    );
    let feed = FeedSource::new(reqwest::Client::new(), &config, None).unwrap();

    let mut registry = SourceRegistry::new(1);
    registry.register(Source::new("vision", "super-rugby", dec!(0.6)), Arc::new(feed));
    let fetched = registry.fetch_all(5).await;

    assert_eq!(fetched.sources.len(), 0);
    assert_eq!(fetched.failures.len(), 1);
    assert_eq!(fetched.failures[0].kind(), "source_retrieval");
}

#[test]
fn feed_source_rejects_non_http_location() {
    let config = source_config("vision", dec!(0.6), SourceKind::Feed, "data/x.json".to_string());
    assert!(FeedSource::new(reqwest::Client::new(), &config, None).is_err());
}
