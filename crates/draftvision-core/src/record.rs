// Athlete records, season snapshots, and draft outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Draft outcome
// ---------------------------------------------------------------------------

/// Where an athlete was actually drafted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftOutcome {
    /// 1-based draft round.
    pub round: u32,
    /// 1-based overall pick number.
    pub pick: u32,
}

// ---------------------------------------------------------------------------
// Season snapshot
// ---------------------------------------------------------------------------

/// One season of statistics for an athlete.
///
/// `numeric` holds every numeric column the import layer supplied for the
/// row, whether or not it is relevant to the athlete's position. Relevance is
/// decided later by the schema registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatSnapshot {
    pub year: i32,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub numeric: BTreeMap<String, f64>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl StatSnapshot {
    pub fn new(year: i32) -> Self {
        Self {
            year,
            ..Self::default()
        }
    }

    /// Builder-style setter for a numeric stat.
    pub fn with_stat(mut self, name: &str, value: f64) -> Self {
        self.numeric.insert(name.to_string(), value);
        self
    }

    /// Builder-style setter for a categorical label.
    pub fn with_label(mut self, name: &str, value: &str) -> Self {
        self.labels.insert(name.to_string(), value.to_string());
        self
    }

    /// A numeric stat, treating non-finite values as missing.
    pub fn stat(&self, name: &str) -> Option<f64> {
        self.numeric.get(name).copied().filter(|v| v.is_finite())
    }

    /// A categorical label, treating blank strings as missing. The snapshot's
    /// `team` answers for the `team` field.
    pub fn label(&self, name: &str) -> Option<&str> {
        let value = match self.labels.get(name) {
            Some(v) => Some(v.as_str()),
            None if name == "team" => self.team.as_deref(),
            None => None,
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Athlete record
// ---------------------------------------------------------------------------

/// Identity, season history, and (for past classes) draft outcome of one
/// athlete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteRecord {
    pub name: String,
    pub position: String,
    #[serde(default)]
    pub school: Option<String>,
    #[serde(default)]
    pub snapshots: Vec<StatSnapshot>,
    #[serde(default)]
    pub draft: Option<DraftOutcome>,
}

impl AthleteRecord {
    pub fn new(name: &str, position: &str, school: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            position: position.to_string(),
            school: school.map(str::to_string),
            snapshots: Vec::new(),
            draft: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: StatSnapshot) -> Self {
        self.snapshots.push(snapshot);
        self
    }

    pub fn with_draft(mut self, round: u32, pick: u32) -> Self {
        self.draft = Some(DraftOutcome { round, pick });
        self
    }

    /// The most recent season on record. Ties on year resolve to the snapshot
    /// that was added last.
    pub fn latest_snapshot(&self) -> Option<&StatSnapshot> {
        self.snapshots.iter().max_by_key(|s| s.year)
    }

    /// Resolve a categorical field: the latest snapshot's label first, then
    /// the identity fields.
    pub fn label(&self, name: &str) -> Option<&str> {
        if let Some(v) = self.latest_snapshot().and_then(|s| s.label(name)) {
            return Some(v);
        }
        let identity = match name {
            "school" => self.school.as_deref(),
            "position" => Some(self.position.as_str()),
            _ => None,
        };
        identity.map(str::trim).filter(|v| !v.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
