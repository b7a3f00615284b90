//! Weighted folding of many sources' predictions into one forecast.
//!
//! Sources are folded in configuration order, each source's predictions in
//! the order they were fetched. For each predicted winner:
//!
//! - the first contribution seeds the forecast, verbatim for a zero-weight
//!   source and as `round(margin * weight)` otherwise;
//! - later weighted contributions add `round(margin * weight)`;
//! - a later zero-weight contribution is a conflict, resolved by
//!   [`ConflictPolicy`].
//!
//! The fold is order-sensitive, so the order of `sources` matters.

use std::collections::{BTreeMap, HashSet};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::data::SourceFetch;
use crate::error::{Failure, Failures};

/// How a zero-weight (authoritative) source interacts with other contributions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Whoever reaches a winner first seeds it. A zero-weight source arriving
    /// after that is reported as a conflict and ignored.
    #[default]
    FirstWins,
    /// A zero-weight source's margin is final for its winner whatever the
    /// order: it replaces earlier weighted sums and later weighted
    /// contributions are ignored. Two zero-weight claims still conflict.
    Authoritative,
}

/// Winner name to aggregated margin, at most one entry per winner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateForecast {
    margins: BTreeMap<String, u32>,
}

impl AggregateForecast {
    pub fn get(&self, winner: &str) -> Option<u32> {
        self.margins.get(winner).copied()
    }

    pub fn len(&self) -> usize {
        self.margins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.margins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.margins.iter().map(|(w, m)| (w.as_str(), *m))
    }
}

impl FromIterator<(String, u32)> for AggregateForecast {
    fn from_iter<T: IntoIterator<Item = (String, u32)>>(iter: T) -> Self {
        Self {
            margins: iter.into_iter().collect(),
        }
    }
}

/// The forecast plus every conflict seen while building it.
///
/// Conflicts are informational; the forecast is usable either way.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub forecast: AggregateForecast,
    pub conflicts: Vec<Failure>,
}

impl Aggregation {
    pub fn error(&self) -> Option<Failures> {
        Failures::from(self.conflicts.clone()).into_error()
    }
}

/// `round(margin * weight)`, halves rounded away from zero. Saturates at `u32::MAX`.
pub fn weighted_margin(margin: u32, weight: Decimal) -> u32 {
    Decimal::from(margin)
        .checked_mul(weight)
        .and_then(|scaled| {
            scaled
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_u32()
        })
        .unwrap_or(u32::MAX)
}

pub fn aggregate(sources: &[SourceFetch], policy: ConflictPolicy) -> Aggregation {
    let mut margins: BTreeMap<String, u32> = BTreeMap::new();
    // Winners whose value came from a zero-weight source.
    let mut authoritative: HashSet<String> = HashSet::new();
    let mut conflicts = Vec::new();

    for fetch in sources {
        let source = &fetch.source;
        let zero_weight = source.is_authoritative();

        for prediction in &fetch.predictions {
            let winner = &prediction.winner;
            let margin = prediction.margin;

            match margins.get_mut(winner) {
                None => {
                    let seeded = if zero_weight {
                        authoritative.insert(winner.clone());
                        margin
                    } else {
                        weighted_margin(margin, source.weight)
                    };
                    debug!(
                        source = %source.name,
                        winner = %winner,
                        weight = %source.weight,
                        margin = seeded,
                        "Forecast seeded"
                    );
                    margins.insert(winner.clone(), seeded);
                }
                Some(existing) if !zero_weight => {
                    if policy == ConflictPolicy::Authoritative && authoritative.contains(winner) {
                        debug!(
                            source = %source.name,
                            winner = %winner,
                            "Weighted contribution ignored for authoritative winner"
                        );
                        continue;
                    }
                    *existing = existing.saturating_add(weighted_margin(margin, source.weight));
                    debug!(
                        source = %source.name,
                        winner = %winner,
                        weight = %source.weight,
                        margin = *existing,
                        "Forecast accumulated"
                    );
                }
                Some(existing) => {
                    if policy == ConflictPolicy::Authoritative && !authoritative.contains(winner) {
                        debug!(
                            source = %source.name,
                            winner = %winner,
                            replaced = *existing,
                            margin,
                            "Authoritative source overrides weighted forecast"
                        );
                        *existing = margin;
                        authoritative.insert(winner.clone());
                        continue;
                    }
                    error!(
                        source = %source.name,
                        winner = %winner,
                        kept = *existing,
                        ignored = margin,
                        "Zero-weight source collided with an existing forecast"
                    );
                    conflicts.push(Failure::AmbiguousAggregation {
                        source_name: source.name.clone(),
                        winner: winner.clone(),
                        kept: *existing,
                        ignored: margin,
                    });
                }
            }
        }
    }

    Aggregation {
        forecast: AggregateForecast { margins },
        conflicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Source;
    use crate::fixtures::models::Prediction;
    use rust_decimal_macros::dec;

    fn fetch(name: &str, weight: Decimal, picks: &[(&str, u32)]) -> SourceFetch {
        let predictions = picks
            .iter()
            .map(|(winner, margin)| {
                if *winner == "draw" {
                    Prediction::new(1, name, "chiefs", "blues", "draw", 0).unwrap()
                } else {
                    Prediction::new(1, name, winner, "opponent", winner, *margin).unwrap()
                }
            })
            .collect();
        SourceFetch {
            source: Source::new(name, "super", weight),
            predictions,
        }
    }

    #[test]
    fn test_single_weighted_source_is_scaled() {
        let agg = aggregate(&[fetch("a", dec!(0.4), &[("chiefs", 8)])], ConflictPolicy::FirstWins);
        assert_eq!(agg.forecast.get("chiefs"), Some(3));
        assert!(agg.error().is_none());
    }

    #[test]
    fn test_weighted_sources_sum_rounded_contributions() {
        let agg = aggregate(
            &[
                fetch("a", dec!(0.6), &[("chiefs", 10)]),
                fetch("b", dec!(0.4), &[("chiefs", 8)]),
            ],
            ConflictPolicy::FirstWins,
        );
        assert_eq!(agg.forecast.get("chiefs"), Some(9));
        assert!(agg.conflicts.is_empty());
    }

    #[test]
    fn test_zero_weight_alone_is_verbatim() {
        let agg = aggregate(&[fetch("a", dec!(0), &[("chiefs", 12)])], ConflictPolicy::FirstWins);
        assert_eq!(agg.forecast.get("chiefs"), Some(12));
    }

    #[test]
    fn test_second_zero_weight_conflicts() {
        let agg = aggregate(
            &[
                fetch("a", dec!(0), &[("chiefs", 12)]),
                fetch("b", dec!(0), &[("chiefs", 5)]),
            ],
            ConflictPolicy::FirstWins,
        );
        assert_eq!(agg.forecast.get("chiefs"), Some(12));
        let err = agg.error().expect("conflict should surface");
        assert_eq!(err.len(), 1);
        assert!(err.to_string().contains("source b"));
        assert_eq!(
            agg.conflicts[0],
            Failure::AmbiguousAggregation {
                source_name: "b".to_string(),
                winner: "chiefs".to_string(),
                kept: 12,
                ignored: 5,
            }
        );
    }

    #[test]
    fn test_weighted_after_zero_weight_accumulates_under_first_wins() {
        let agg = aggregate(
            &[
                fetch("auth", dec!(0), &[("chiefs", 12)]),
                fetch("w", dec!(0.5), &[("chiefs", 6)]),
            ],
            ConflictPolicy::FirstWins,
        );
        assert_eq!(agg.forecast.get("chiefs"), Some(15));
    }

    #[test]
    fn test_first_wins_is_order_sensitive() {
        let weighted_first = aggregate(
            &[
                fetch("w", dec!(0.5), &[("chiefs", 6)]),
                fetch("auth", dec!(0), &[("chiefs", 12)]),
            ],
            ConflictPolicy::FirstWins,
        );
        assert_eq!(weighted_first.forecast.get("chiefs"), Some(3));
        assert_eq!(weighted_first.conflicts.len(), 1);
    }

    #[test]
    fn test_authoritative_policy_ignores_order() {
        let sources = [
            fetch("w1", dec!(0.5), &[("chiefs", 6)]),
            fetch("auth", dec!(0), &[("chiefs", 12)]),
            fetch("w2", dec!(0.5), &[("chiefs", 10)]),
        ];
        let agg = aggregate(&sources, ConflictPolicy::Authoritative);
        assert_eq!(agg.forecast.get("chiefs"), Some(12));
        assert!(agg.conflicts.is_empty());
    }

    #[test]
    fn test_authoritative_policy_still_flags_two_authorities() {
        let agg = aggregate(
            &[
                fetch("a", dec!(0), &[("chiefs", 12)]),
                fetch("b", dec!(0), &[("chiefs", 5)]),
            ],
            ConflictPolicy::Authoritative,
        );
        assert_eq!(agg.forecast.get("chiefs"), Some(12));
        assert_eq!(agg.conflicts.len(), 1);
    }

    #[test]
    fn test_draw_is_an_ordinary_key() {
        let agg = aggregate(
            &[
                fetch("a", dec!(0.5), &[("draw", 0), ("reds", 4)]),
                fetch("b", dec!(0.5), &[("draw", 0)]),
            ],
            ConflictPolicy::FirstWins,
        );
        assert_eq!(agg.forecast.get("draw"), Some(0));
        assert_eq!(agg.forecast.get("reds"), Some(2));
        assert_eq!(agg.forecast.len(), 2);
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(weighted_margin(5, dec!(0.5)), 3);
        assert_eq!(weighted_margin(5, dec!(0.3)), 2);
        assert_eq!(weighted_margin(7, dec!(1)), 7);
    }

    #[test]
    fn test_huge_weight_saturates() {
        assert_eq!(weighted_margin(10, Decimal::MAX), u32::MAX);
        assert_eq!(weighted_margin(3, dec!(5000000000)), u32::MAX);
        assert_eq!(weighted_margin(0, Decimal::MAX), 0);
    }
}
