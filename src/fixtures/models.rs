use serde::{Deserialize, Serialize};

use crate::error::Failure;
use crate::fixtures::normalize::normalize;

/// Integer id of a scheduling period. Treated as an opaque key everywhere.
pub type RoundId = i64;

/// Winner sentinel for a drawn fixture. Always paired with a margin of 0.
pub const DRAW: &str = "draw";

/// Canonical record of a match in a round, as published by the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    /// Round-scoped token identifying the fixture on the target.
    pub id: String,
    pub left_team: String,
    pub right_team: String,
    pub left_team_id: String,
    pub right_team_id: String,
}

impl Fixture {
    /// Build a fixture, normalizing both team names.
    pub fn new(
        id: impl Into<String>,
        left_team: &str,
        right_team: &str,
        left_team_id: impl Into<String>,
        right_team_id: impl Into<String>,
    ) -> Result<Self, Failure> {
        let id = id.into();
        let left_team = normalize(left_team);
        let right_team = normalize(right_team);

        if left_team.is_empty() || right_team.is_empty() {
            return Err(Failure::malformed(
                format!("fixture {id}"),
                "team",
                format!("{left_team} v {right_team}"),
                "empty team name",
            ));
        }
        if left_team == right_team {
            return Err(Failure::malformed(
                format!("fixture {id}"),
                "team",
                left_team,
                "a team cannot play itself",
            ));
        }

        Ok(Self {
            id,
            left_team,
            right_team,
            left_team_id: left_team_id.into(),
            right_team_id: right_team_id.into(),
        })
    }

    pub fn team(&self, side: Side) -> &str {
        match side {
            Side::Left => &self.left_team,
            Side::Right => &self.right_team,
        }
    }

    pub fn team_id(&self, side: Side) -> &str {
        match side {
            Side::Left => &self.left_team_id,
            Side::Right => &self.right_team_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "LEFT"),
            Self::Right => write!(f, "RIGHT"),
        }
    }
}

/// A single source's predicted outcome for one fixture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prediction {
    pub round_id: RoundId,
    pub source: String,
    pub left_team: String,
    pub right_team: String,
    pub winner: String,
    pub margin: u32,
}

impl Prediction {
    pub fn new(
        round_id: RoundId,
        source: impl Into<String>,
        left_team: &str,
        right_team: &str,
        winner: &str,
        margin: u32,
    ) -> Result<Self, Failure> {
        let source = source.into();
        let (left_team, right_team, winner) =
            checked_outcome(&source, left_team, right_team, winner, margin)?;
        Ok(Self {
            round_id,
            source,
            left_team,
            right_team,
            winner,
            margin,
        })
    }

    /// Positive margins favour the left team, negative the right, zero is a draw.
    pub fn from_signed_margin(
        round_id: RoundId,
        source: impl Into<String>,
        left_team: &str,
        right_team: &str,
        signed_margin: i64,
    ) -> Result<Self, Failure> {
        let source = source.into();
        let margin = u32::try_from(signed_margin.unsigned_abs()).map_err(|_| {
            Failure::malformed(
                source.clone(),
                "margin",
                signed_margin.to_string(),
                "out of range",
            )
        })?;
        let winner = match signed_margin.signum() {
            1 => left_team.to_string(),
            -1 => right_team.to_string(),
            _ => DRAW.to_string(),
        };
        Self::new(round_id, source, left_team, right_team, &winner, margin)
    }

    pub fn is_draw(&self) -> bool {
        self.winner == DRAW
    }
}

/// Ground-truth outcome of a completed fixture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchResult {
    pub round_id: RoundId,
    pub left_team: String,
    pub right_team: String,
    pub winner: String,
    pub margin: u32,
}

impl MatchResult {
    pub fn new(
        round_id: RoundId,
        left_team: &str,
        right_team: &str,
        winner: &str,
        margin: u32,
    ) -> Result<Self, Failure> {
        let (left_team, right_team, winner) = checked_outcome(
            &format!("result for round {round_id}"),
            left_team,
            right_team,
            winner,
            margin,
        )?;
        Ok(Self {
            round_id,
            left_team,
            right_team,
            winner,
            margin,
        })
    }

    pub fn is_draw(&self) -> bool {
        self.winner == DRAW
    }
}

/// Normalizes the names and enforces the winner/margin invariants.
fn checked_outcome(
    origin: &str,
    left_team: &str,
    right_team: &str,
    winner: &str,
    margin: u32,
) -> Result<(String, String, String), Failure> {
    let left_team = normalize(left_team);
    let right_team = normalize(right_team);
    let winner = normalize(winner);

    if left_team.is_empty() || right_team.is_empty() {
        return Err(Failure::malformed(
            origin,
            "team",
            format!("{left_team} v {right_team}"),
            "empty team name",
        ));
    }
    if left_team == right_team {
        return Err(Failure::malformed(
            origin,
            "team",
            left_team,
            "a team cannot play itself",
        ));
    }

    if winner == DRAW {
        if margin != 0 {
            return Err(Failure::malformed(
                origin,
                "margin",
                margin.to_string(),
                "a draw must have a margin of 0",
            ));
        }
    } else {
        if winner != left_team && winner != right_team {
            return Err(Failure::malformed(
                origin,
                "winner",
                winner,
                "winner is neither side of the fixture",
            ));
        }
        if margin == 0 {
            return Err(Failure::malformed(
                origin,
                "margin",
                "0",
                "a winning margin must be positive",
            ));
        }
    }

    Ok((left_team, right_team, winner))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_normalizes_names() {
        let fixture = Fixture::new("tok1", "The Hurricanes", "Blues", "11", "12").unwrap();
        assert_eq!(fixture.left_team, "hurricanes");
        assert_eq!(fixture.right_team, "blues");
        assert_eq!(fixture.team(Side::Right), "blues");
        assert_eq!(fixture.team_id(Side::Left), "11");
    }

    #[test]
    fn test_fixture_rejects_same_team() {
        let err = Fixture::new("tok1", "Blues", "the blues", "1", "2").unwrap_err();
        assert_eq!(err.kind(), "malformed_record");
    }

    #[test]
    fn test_signed_margin_picks_winner() {
        let left = Prediction::from_signed_margin(5, "vision", "Chiefs", "Blues", 7).unwrap();
        assert_eq!(left.winner, "chiefs");
        assert_eq!(left.margin, 7);

        let right = Prediction::from_signed_margin(5, "vision", "Chiefs", "Blues", -12).unwrap();
        assert_eq!(right.winner, "blues");
        assert_eq!(right.margin, 12);

        let draw = Prediction::from_signed_margin(5, "vision", "Chiefs", "Blues", 0).unwrap();
        assert!(draw.is_draw());
        assert_eq!(draw.margin, 0);
    }

    #[test]
    fn test_prediction_margin_invariants() {
        assert!(Prediction::new(1, "s", "chiefs", "blues", "draw", 3).is_err());
        assert!(Prediction::new(1, "s", "chiefs", "blues", "chiefs", 0).is_err());
        assert!(Prediction::new(1, "s", "chiefs", "blues", "crusaders", 4).is_err());
        assert!(Prediction::new(1, "s", "chiefs", "blues", "The Chiefs", 4).is_ok());
    }

    #[test]
    fn test_result_draw() {
        let result = MatchResult::new(3, "Brumbies", "Reds", "Draw", 0).unwrap();
        assert!(result.is_draw());
    }
}
