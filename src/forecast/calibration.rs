//! Source accuracy scoring against completed rounds.
//!
//! [`calibrate`] compares what each source predicted with what actually
//! happened and reports hits, misses and margin error. It never touches
//! source weights. [`propose_weights`] turns a report into suggested weights;
//! applying them is a separate, explicit step.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info};

use crate::data::Source;
use crate::fixtures::matcher::names_match;
use crate::fixtures::models::{MatchResult, Prediction, RoundId};

const PCT_DP: u32 = 2;
const WEIGHT_DP: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Right winner; margin error measured.
    Hit {
        margin_difference: u32,
        margin_error_pct: Decimal,
    },
    /// Wrong side, margin irrelevant.
    Miss,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredPrediction {
    pub source: String,
    pub left_team: String,
    pub right_team: String,
    pub predicted_winner: String,
    pub actual_winner: String,
    pub predicted_margin: u32,
    pub actual_margin: u32,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceAccuracy {
    pub source: String,
    pub predictions: usize,
    pub hits: usize,
    pub misses: usize,
    /// Predictions with no result to compare against.
    pub unmatched: usize,
    pub mean_margin_difference: Option<Decimal>,
    pub mean_margin_error_pct: Option<Decimal>,
}

impl SourceAccuracy {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            predictions: 0,
            hits: 0,
            misses: 0,
            unmatched: 0,
            mean_margin_difference: None,
            mean_margin_error_pct: None,
        }
    }

    pub fn scored(&self) -> usize {
        self.hits + self.misses
    }

    /// Fraction of scored predictions that named the right winner.
    pub fn hit_rate(&self) -> Option<Decimal> {
        let scored = self.scored();
        if scored == 0 {
            return None;
        }
        Some(Decimal::from(self.hits as u64) / Decimal::from(scored as u64))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalibrationReport {
    pub round_id: RoundId,
    /// One entry per source, in the order sources first appear in the predictions.
    pub sources: Vec<SourceAccuracy>,
    pub scored: Vec<ScoredPrediction>,
}

impl CalibrationReport {
    pub fn for_source(&self, source: &str) -> Option<&SourceAccuracy> {
        self.sources.iter().find(|s| s.source == source)
    }
}

/// Percentage error of a predicted margin against the actual one.
///
/// Exactly equal margins score 0. An actual margin of 0 is treated as 1 so a
/// mispredicted draw still yields a finite value.
pub fn margin_error_pct(predicted: u32, actual: u32) -> Decimal {
    if predicted == actual {
        return Decimal::ZERO;
    }
    let difference = Decimal::from(predicted.abs_diff(actual));
    let denominator = Decimal::from(actual.max(1));
    (difference / denominator * dec!(100)).round_dp(PCT_DP)
}

pub fn calibrate(
    previous_round_id: RoundId,
    predictions: &[Prediction],
    results: &[MatchResult],
) -> CalibrationReport {
    let mut order: Vec<String> = Vec::new();
    let mut tallies: HashMap<String, (SourceAccuracy, u64, Decimal)> = HashMap::new();
    let mut scored = Vec::new();

    for prediction in predictions {
        let (accuracy, difference_sum, error_sum) = tallies
            .entry(prediction.source.clone())
            .or_insert_with(|| {
                order.push(prediction.source.clone());
                (SourceAccuracy::new(&prediction.source), 0, Decimal::ZERO)
            });
        accuracy.predictions += 1;

        let paired = results.iter().find(|result| {
            names_match(&prediction.left_team, &result.left_team)
                && names_match(&prediction.right_team, &result.right_team)
        });
        let Some(result) = paired else {
            debug!(
                source = %prediction.source,
                left_team = %prediction.left_team,
                right_team = %prediction.right_team,
                "No result for prediction"
            );
            accuracy.unmatched += 1;
            continue;
        };

        let outcome = if names_match(&prediction.winner, &result.winner) {
            let margin_difference = prediction.margin.abs_diff(result.margin);
            let margin_error_pct = margin_error_pct(prediction.margin, result.margin);
            accuracy.hits += 1;
            *difference_sum += u64::from(margin_difference);
            *error_sum += margin_error_pct;
            info!(
                round_id = previous_round_id,
                source = %prediction.source,
                winner = %result.winner,
                predicted_margin = prediction.margin,
                actual_margin = result.margin,
                margin_difference,
                margin_error_pct = %margin_error_pct,
                "Prediction picked the winner"
            );
            Outcome::Hit {
                margin_difference,
                margin_error_pct,
            }
        } else {
            accuracy.misses += 1;
            info!(
                round_id = previous_round_id,
                source = %prediction.source,
                predicted_winner = %prediction.winner,
                actual_winner = %result.winner,
                predicted_margin = prediction.margin,
                actual_margin = result.margin,
                "Prediction picked the wrong winner"
            );
            Outcome::Miss
        };

        scored.push(ScoredPrediction {
            source: prediction.source.clone(),
            left_team: result.left_team.clone(),
            right_team: result.right_team.clone(),
            predicted_winner: prediction.winner.clone(),
            actual_winner: result.winner.clone(),
            predicted_margin: prediction.margin,
            actual_margin: result.margin,
            outcome,
        });
    }

    let sources = order
        .into_iter()
        .filter_map(|name| tallies.remove(&name))
        .map(|(mut accuracy, difference_sum, error_sum)| {
            if accuracy.hits > 0 {
                let hits = Decimal::from(accuracy.hits as u64);
                accuracy.mean_margin_difference =
                    Some((Decimal::from(difference_sum) / hits).round_dp(PCT_DP));
                accuracy.mean_margin_error_pct = Some((error_sum / hits).round_dp(PCT_DP));
            }
            accuracy
        })
        .collect();

    CalibrationReport {
        round_id: previous_round_id,
        sources,
        scored,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeightProposal {
    pub source: String,
    pub current: Decimal,
    pub proposed: Decimal,
}

impl WeightProposal {
    pub fn changed(&self) -> bool {
        self.current != self.proposed
    }
}

/// Suggest new weights from a calibration report.
///
/// Zero-weight sources stay authoritative. Weighted sources with scored
/// predictions are scored `hit_rate / (1 + mean_error_pct / 100)` and share
/// their combined current weight in proportion to that score. Sources with
/// nothing scored, or a round where every scored source scored 0, keep their
/// weights.
pub fn propose_weights(report: &CalibrationReport, sources: &[Source]) -> Vec<WeightProposal> {
    let score = |source: &Source| -> Option<Decimal> {
        if source.is_authoritative() {
            return None;
        }
        let accuracy = report.for_source(&source.name)?;
        let hit_rate = accuracy.hit_rate()?;
        let error = accuracy.mean_margin_error_pct.unwrap_or(Decimal::ZERO);
        Some(hit_rate / (Decimal::ONE + error / dec!(100)))
    };

    let scores: Vec<Option<Decimal>> = sources.iter().map(score).collect();
    let pool: Decimal = sources
        .iter()
        .zip(&scores)
        .filter(|(_, s)| s.is_some())
        .map(|(source, _)| source.weight)
        .sum();
    let total: Decimal = scores.iter().flatten().copied().sum();

    sources
        .iter()
        .zip(scores)
        .map(|(source, score)| {
            let proposed = match score {
                Some(score) if !total.is_zero() => (score / total * pool).round_dp(WEIGHT_DP),
                _ => source.weight,
            };
            WeightProposal {
                source: source.name.clone(),
                current: source.weight,
                proposed,
            }
        })
        .collect()
}
