//! Binding raw source predictions to the round's canonical fixtures.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::data::SourceFetch;
use crate::error::Failure;
use crate::fixtures::matcher::match_fixture;
use crate::fixtures::models::{Fixture, Prediction, DRAW};

/// Predictions rewritten to canonical fixture names, plus the ones that could not be bound.
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    pub sources: Vec<SourceFetch>,
    /// Source records as fetched, minus repeat predictions for a fixture. This is what gets stored.
    pub raw: Vec<Prediction>,
    pub dropped: Vec<Failure>,
}

/// Bind every prediction to a fixture via its winner (or left team for a draw).
///
/// Bound predictions take the fixture's team names so that all sources agree
/// on spelling before aggregation. Unbound predictions are dropped and
/// reported but still kept in `raw`; a second prediction from the same source
/// for an already bound fixture is dropped from both.
pub fn reconcile(fetched: &[SourceFetch], fixtures: &[Fixture]) -> Reconciled {
    let mut reconciled = Reconciled::default();

    for fetch in fetched {
        let source = &fetch.source.name;
        let mut bound_fixtures: HashSet<&str> = HashSet::new();
        let mut predictions = Vec::with_capacity(fetch.predictions.len());

        for prediction in &fetch.predictions {
            let anchor = if prediction.is_draw() {
                &prediction.left_team
            } else {
                &prediction.winner
            };

            let Some(found) = match_fixture(anchor, fixtures) else {
                warn!(source = %source, team = %anchor, "Prediction matched no fixture");
                reconciled.dropped.push(Failure::UnresolvedTeamName {
                    source_name: source.clone(),
                    name: anchor.clone(),
                });
                reconciled.raw.push(prediction.clone());
                continue;
            };

            if !bound_fixtures.insert(found.fixture.id.as_str()) {
                warn!(source = %source, fixture = %found.fixture.id, "Duplicate prediction for fixture");
                reconciled.dropped.push(Failure::malformed(
                    source.as_str(),
                    "fixture",
                    found.fixture.id.as_str(),
                    "source predicted the same fixture twice",
                ));
                continue;
            }

            reconciled.raw.push(prediction.clone());
            debug!(
                source = %source,
                team = %anchor,
                fixture_index = found.index,
                fixture = %found.fixture.id,
                side = %found.side,
                rank = found.rank,
                "Prediction bound to fixture"
            );

            let winner = if prediction.is_draw() {
                DRAW.to_string()
            } else {
                found.team().to_string()
            };
            predictions.push(Prediction {
                round_id: prediction.round_id,
                source: prediction.source.clone(),
                left_team: found.fixture.left_team.clone(),
                right_team: found.fixture.right_team.clone(),
                winner,
                margin: prediction.margin,
            });
        }

        reconciled.sources.push(SourceFetch {
            source: fetch.source.clone(),
            predictions,
        });
    }

    reconciled
}
