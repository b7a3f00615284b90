//! Fuzzy binding of loosely-spelled team names to canonical fixtures.
//!
//! Ranking works on Unicode-normalized, case-folded text: a candidate ranks
//! against a team name only if all of its characters occur in the team name
//! in order, and the rank is then the edit distance between the two
//! (0 is an exact match). Any rank counts as a match. The scan is ordered and
//! returns the first qualifying fixture side rather than the closest one.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::fixtures::models::{Fixture, Side};
use crate::fixtures::normalize::normalize;

/// A fixture side bound to a candidate name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixtureMatch<'a> {
    pub index: usize,
    pub fixture: &'a Fixture,
    pub side: Side,
    pub rank: usize,
}

impl FixtureMatch<'_> {
    pub fn team(&self) -> &str {
        self.fixture.team(self.side)
    }
}

fn fold(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Rank `needle` against `haystack`, or `None` when they have no ordered overlap.
pub fn rank_match(needle: &str, haystack: &str) -> Option<usize> {
    let needle = fold(needle);
    let haystack = fold(haystack);

    let mut remaining = haystack.chars();
    for wanted in needle.chars() {
        // Advance until the wanted char is consumed, or give up.
        remaining.by_ref().find(|c| *c == wanted)?;
    }

    Some(strsim::levenshtein(&needle, &haystack))
}

/// Whether two names refer to the same team under [`rank_match`].
pub fn names_match(needle: &str, haystack: &str) -> bool {
    rank_match(&normalize(needle), &normalize(haystack)).is_some()
}

/// Find the first fixture side, in input order, that `candidate` ranks against.
pub fn match_fixture<'a>(candidate: &str, fixtures: &'a [Fixture]) -> Option<FixtureMatch<'a>> {
    let candidate = normalize(candidate);
    if candidate.is_empty() {
        return None;
    }

    fixtures.iter().enumerate().find_map(|(index, fixture)| {
        [Side::Left, Side::Right].into_iter().find_map(|side| {
            rank_match(&candidate, fixture.team(side)).map(|rank| FixtureMatch {
                index,
                fixture,
                side,
                rank,
            })
        })
    })
}
