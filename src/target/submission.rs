//! Mapping the aggregate forecast back onto the target's fixtures.

use serde::Serialize;
use tracing::{debug, warn};

use crate::fixtures::matcher::match_fixture;
use crate::fixtures::models::{Fixture, RoundId, DRAW};
use crate::forecast::aggregate::AggregateForecast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixturePick {
    pub fixture_id: String,
    pub left_team: String,
    pub right_team: String,
    pub winner: String,
    /// Target team id of the winner; `None` submits a draw.
    pub winner_team_id: Option<String>,
    pub margin: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub round_id: RoundId,
    pub picks: Vec<FixturePick>,
    /// Fixtures no forecast entry mapped to.
    pub missing: Vec<String>,
    /// Forecast winners that matched no fixture.
    pub unmapped: Vec<String>,
    /// Forecast winners that lost out to a larger margin on the same fixture.
    pub contested: Vec<String>,
}

impl Submission {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Bind each forecast winner to the first fixture it matches.
///
/// When both sides of a fixture appear in the forecast the larger margin is
/// kept (the earlier entry on a tie). A margin of 0 is submitted as a draw.
pub fn build_submission(
    round_id: RoundId,
    forecast: &AggregateForecast,
    fixtures: &[Fixture],
) -> Submission {
    let mut slots: Vec<Option<FixturePick>> = vec![None; fixtures.len()];
    let mut submission = Submission {
        round_id,
        ..Submission::default()
    };

    for (winner, margin) in forecast.iter() {
        if winner == DRAW {
            warn!(margin, "Draw forecast cannot be tied to a fixture by name");
            submission.unmapped.push(winner.to_string());
            continue;
        }
        let Some(found) = match_fixture(winner, fixtures) else {
            warn!(winner = %winner, "Forecast winner matched no fixture");
            submission.unmapped.push(winner.to_string());
            continue;
        };

        let pick = FixturePick {
            fixture_id: found.fixture.id.clone(),
            left_team: found.fixture.left_team.clone(),
            right_team: found.fixture.right_team.clone(),
            winner: if margin == 0 {
                DRAW.to_string()
            } else {
                found.team().to_string()
            },
            winner_team_id: (margin > 0).then(|| found.fixture.team_id(found.side).to_string()),
            margin,
        };
        debug!(
            fixture_index = found.index,
            fixture = %pick.fixture_id,
            winner = %pick.winner,
            margin,
            "Forecast mapped to fixture"
        );

        match &slots[found.index] {
            Some(existing) if existing.margin >= margin => {
                warn!(fixture = %pick.fixture_id, kept = %existing.winner, dropped = %winner, "Contested fixture");
                submission.contested.push(winner.to_string());
            }
            Some(existing) => {
                warn!(fixture = %pick.fixture_id, kept = %winner, dropped = %existing.winner, "Contested fixture");
                submission.contested.push(existing.winner.clone());
                slots[found.index] = Some(pick);
            }
            None => slots[found.index] = Some(pick),
        }
    }

    for (fixture, slot) in fixtures.iter().zip(slots) {
        match slot {
            Some(pick) => submission.picks.push(pick),
            None => submission.missing.push(fixture.id.clone()),
        }
    }

    submission
}
