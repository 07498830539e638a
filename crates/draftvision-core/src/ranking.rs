// Cross-position ranking of scored athletes.
//
// Every position group's scored athletes are concatenated and sorted by value
// score, highest first. The sort is stable: athletes with equal scores keep
// the order they were supplied in (group order, then order within the group).
// Ranks are sequential 1..=n with no shared ranks.

use serde::{Deserialize, Serialize};

/// An athlete with a computed value score, as produced by one position model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredAthlete {
    pub name: String,
    pub position: String,
    pub school: Option<String>,
    pub value_score: f64,
}

/// One entry of the merged ranking. `value_score` is unrounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub name: String,
    pub position: String,
    pub school: Option<String>,
    pub value_score: f64,
}

/// Presentation shape: `value_score` rounded to one decimal place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRow {
    pub rank: usize,
    pub name: String,
    pub position: String,
    pub school: Option<String>,
    pub value_score: f64,
}

impl From<&RankingEntry> for RankingRow {
    fn from(entry: &RankingEntry) -> Self {
        Self {
            rank: entry.rank,
            name: entry.name.clone(),
            position: entry.position.clone(),
            school: entry.school.clone(),
            value_score: round1(entry.value_score),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Merge per-position score lists into one ranked list.
pub fn rank(groups: &[Vec<ScoredAthlete>]) -> Vec<RankingEntry> {
    let mut merged: Vec<&ScoredAthlete> = groups.iter().flatten().collect();
    // `sort_by` is stable, which is what gives ties their insertion order.
    merged.sort_by(|a, b| {
        b.value_score
            .partial_cmp(&a.value_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    merged
        .into_iter()
        .enumerate()
        .map(|(i, athlete)| RankingEntry {
            rank: i + 1,
            name: athlete.name.clone(),
            position: athlete.position.clone(),
            school: athlete.school.clone(),
            value_score: athlete.value_score,
        })
        .collect()
}

/// Keep only entries whose position matches `position` (case-insensitive).
///
/// Ranks are the global ranks computed before filtering; they are not
/// renumbered, so a filtered view can have gaps.
pub fn filter_position(entries: &[RankingEntry], position: &str) -> Vec<RankingEntry> {
    let wanted = position.trim();
    entries
        .iter()
        .filter(|e| e.position.trim().eq_ignore_ascii_case(wanted))
        .cloned()
        .collect()
}

/// Round every entry's score for presentation.
pub fn presentation_rows(entries: &[RankingEntry]) -> Vec<RankingRow> {
    entries.iter().map(RankingRow::from).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
