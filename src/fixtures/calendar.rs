//! Round identification from configured date ranges.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::fixtures::models::RoundId;

/// One scheduling period. `start` and `end` are inclusive UTC dates.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoundWindow {
    pub id: RoundId,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Default)]
pub struct RoundCalendar {
    rounds: Vec<RoundWindow>,
}

impl RoundCalendar {
    pub fn new(rounds: Vec<RoundWindow>) -> Result<Self> {
        for window in &rounds {
            if window.end < window.start {
                bail!(
                    "round {} ends ({}) before it starts ({})",
                    window.id,
                    window.end,
                    window.start
                );
            }
        }
        Ok(Self { rounds })
    }

    /// Round whose window contains `date`. The first configured window wins on overlap.
    pub fn current_round(&self, date: NaiveDate) -> Result<RoundId> {
        match self
            .rounds
            .iter()
            .find(|w| w.start <= date && date <= w.end)
        {
            Some(window) => Ok(window.id),
            None => bail!("no configured round covers {date}"),
        }
    }

    /// Greatest configured round id below `round_id`.
    pub fn previous_round(&self, round_id: RoundId) -> Option<RoundId> {
        self.rounds
            .iter()
            .map(|w| w.id)
            .filter(|id| *id < round_id)
            .max()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn calendar() -> RoundCalendar {
        RoundCalendar::new(vec![
            RoundWindow { id: 1, start: date(2026, 2, 13), end: date(2026, 2, 15) },
            RoundWindow { id: 2, start: date(2026, 2, 20), end: date(2026, 2, 22) },
            RoundWindow { id: 4, start: date(2026, 3, 6), end: date(2026, 3, 8) },
        ])
        .unwrap()
    }

    #[test]
    fn test_current_round_inclusive_bounds() {
        let cal = calendar();
        assert_eq!(cal.current_round(date(2026, 2, 13)).unwrap(), 1);
        assert_eq!(cal.current_round(date(2026, 2, 15)).unwrap(), 1);
        assert_eq!(cal.current_round(date(2026, 2, 21)).unwrap(), 2);
    }

    #[test]
    fn test_gap_between_rounds_is_an_error() {
        assert!(calendar().current_round(date(2026, 2, 17)).is_err());
    }

    #[test]
    fn test_previous_round_skips_gaps() {
        let cal = calendar();
        assert_eq!(cal.previous_round(4), Some(2));
        assert_eq!(cal.previous_round(1), None);
    }

    #[test]
    fn test_inverted_window_rejected() {
        let bad = RoundCalendar::new(vec![RoundWindow {
            id: 9,
            start: date(2026, 5, 2),
            end: date(2026, 5, 1),
        }]);
        assert!(bad.is_err());
    }
}
