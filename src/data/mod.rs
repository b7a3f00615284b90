pub mod feed;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::{Secrets, SourceKind, SourcesConfig};
use crate::data::feed::{FeedSource, FileSource};
use crate::error::Failure;
use crate::fixtures::models::{Prediction, RoundId};

/// A configured provider of margin predictions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    /// Also the registry key for the source's predictor.
    pub name: String,
    pub tournament: String,
    /// 0 marks the source as authoritative (unweighted).
    pub weight: Decimal,
}

impl Source {
    pub fn new(name: impl Into<String>, tournament: impl Into<String>, weight: Decimal) -> Self {
        Self {
            name: name.into(),
            tournament: tournament.into(),
            weight,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.weight.is_zero()
    }
}

/// Everything one fetch produced: usable predictions plus rows that failed to parse.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub predictions: Vec<Prediction>,
    pub malformed: Vec<Failure>,
}

/// Trait for every external prediction source.
#[async_trait]
pub trait SourcePredictor: Send + Sync {
    /// Fetch this source's predictions for a competition round.
    async fn fetch(&self, round_id: RoundId) -> Result<SourceBatch>;

    /// Short description of how the source is reached, for logs.
    fn describe(&self) -> String;
}

/// Outcome of fetching one source.
#[derive(Debug, Clone)]
pub struct SourceFetch {
    pub source: Source,
    pub predictions: Vec<Prediction>,
}

/// Predictions from all sources in configuration order, plus collected failures.
#[derive(Debug, Clone, Default)]
pub struct FetchedRound {
    pub sources: Vec<SourceFetch>,
    pub failures: Vec<Failure>,
}

impl FetchedRound {
    pub fn all_predictions(&self) -> impl Iterator<Item = &Prediction> {
        self.sources.iter().flat_map(|s| s.predictions.iter())
    }
}

/// Configured sources bound to their predictors, resolved once at startup.
pub struct SourceRegistry {
    entries: Vec<(Source, Arc<dyn SourcePredictor>)>,
    max_concurrency: usize,
}

impl SourceRegistry {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Build a predictor for every configured source. Unknown or broken
    /// configuration fails here rather than mid-run.
    pub fn from_config(config: &SourcesConfig, secrets: &Secrets) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;

        let mut registry = Self::new(config.max_concurrency);
        for endpoint in &config.endpoints {
            let source = Source::new(&endpoint.name, &endpoint.tournament, endpoint.weight);
            let predictor: Arc<dyn SourcePredictor> = match endpoint.kind {
                SourceKind::Feed => Arc::new(FeedSource::new(
                    client.clone(),
                    endpoint,
                    secrets.source_keys.get(&endpoint.name).cloned(),
                )?),
                SourceKind::File => Arc::new(FileSource::new(endpoint)),
            };
            registry.register(source, predictor);
        }

        tracing::info!(
            sources = registry.len(),
            max_concurrency = registry.max_concurrency,
            "Source registry initialized"
        );
        Ok(registry)
    }

    pub fn register(&mut self, source: Source, predictor: Arc<dyn SourcePredictor>) {
        self.entries.push((source, predictor));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sources(&self) -> Vec<Source> {
        self.entries.iter().map(|(s, _)| s.clone()).collect()
    }

    /// Replace configured weights with stored ones where present.
    pub fn apply_weights(&mut self, weights: &HashMap<String, Decimal>) {
        for (source, _) in &mut self.entries {
            if let Some(weight) = weights.get(&source.name) {
                tracing::info!(
                    source = %source.name,
                    configured = %source.weight,
                    stored = %weight,
                    "Using stored source weight"
                );
                source.weight = *weight;
            }
        }
    }

    /// Fetch every source with bounded concurrency. Results keep configuration
    /// order; a failing source is recorded and skipped.
    pub async fn fetch_all(&self, round_id: RoundId) -> FetchedRound {
        let outcomes: Vec<(Source, Result<SourceBatch>)> = stream::iter(self.entries.iter())
            .map(|(source, predictor)| {
                let predictor = Arc::clone(predictor);
                let source = source.clone();
                async move {
                    tracing::debug!(
                        source = %source.name,
                        via = %predictor.describe(),
                        "Fetching predictions"
                    );
                    let result = predictor.fetch(round_id).await;
                    (source, result)
                }
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut fetched = FetchedRound::default();
        for (source, result) in outcomes {
            match result {
                Ok(batch) => {
                    tracing::info!(
                        source = %source.name,
                        predictions = batch.predictions.len(),
                        malformed = batch.malformed.len(),
                        "Predictions fetched"
                    );
                    for failure in &batch.malformed {
                        tracing::warn!(source = %source.name, error = %failure, "Malformed record skipped");
                    }
                    fetched.failures.extend(batch.malformed);
                    fetched.sources.push(SourceFetch {
                        source,
                        predictions: batch.predictions,
                    });
                }
                Err(e) => {
                    tracing::warn!(source = %source.name, error = %e, "Source fetch failed");
                    fetched.failures.push(Failure::SourceRetrieval {
                        source_name: source.name.clone(),
                        reason: format!("{e:#}"),
                    });
                }
            }
        }

        fetched
    }
}
