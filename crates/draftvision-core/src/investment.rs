// Group-wise standardization of positional investment.
//
// Each (period, role) group is standardized on its own, fresh on every call.
// Nothing is fitted or kept between calls.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

use crate::error::{EngineError, Result};

/// Raw investment of one entity in one role during one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentRecord {
    pub entity: String,
    pub period: i32,
    pub role: String,
    pub raw_measure: f64,
}

impl InvestmentRecord {
    pub fn new(entity: &str, period: i32, role: &str, raw_measure: f64) -> Self {
        Self {
            entity: entity.to_string(),
            period,
            role: role.to_string(),
            raw_measure,
        }
    }
}

/// Coarse label for a z-score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentTier {
    Low,
    Average,
    High,
}

impl InvestmentTier {
    /// z <= -1 is low, z > 1 is high, everything between is average.
    pub fn from_zscore(z: f64) -> Self {
        if z <= -1.0 {
            InvestmentTier::Low
        } else if z <= 1.0 {
            InvestmentTier::Average
        } else {
            InvestmentTier::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentTier::Low => "low",
            InvestmentTier::Average => "average",
            InvestmentTier::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentSignal {
    pub entity: String,
    pub period: i32,
    pub role: String,
    pub raw_measure: f64,
    pub z_score: f64,
    pub tier: InvestmentTier,
}

/// Denominator used for the group standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deviation {
    /// n - 1 denominator.
    #[default]
    Sample,
    /// n denominator.
    Population,
}

// ---------------------------------------------------------------------------
// Group statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct GroupStats {
    mean: f64,
    stdev: f64,
}

/// Mean and standard deviation of a group. A group whose members are all
/// equal, or a sample deviation over fewer than two values, has zero spread.
fn group_stats(values: &[f64], deviation: Deviation) -> GroupStats {
    let Some(&first) = values.first() else {
        return GroupStats {
            mean: 0.0,
            stdev: 0.0,
        };
    };
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    // The rounded mean of equal large values is not exactly the value, which
    // would leave a tiny nonzero spread.
    if values.iter().all(|&v| v == first) {
        return GroupStats { mean, stdev: 0.0 };
    }
    let denominator = match deviation {
        Deviation::Sample if values.len() < 2 => {
            return GroupStats { mean, stdev: 0.0 };
        }
        Deviation::Sample => n - 1.0,
        Deviation::Population => n,
    };
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / denominator;
    GroupStats {
        mean,
        stdev: variance.sqrt(),
    }
}

fn zscore(value: f64, stats: GroupStats) -> f64 {
    if stats.stdev == 0.0 {
        return 0.0;
    }
    (value - stats.mean) / stats.stdev
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Standardize every record's raw measure within its (period, role) group.
///
/// Output keeps input order. Records with a non-finite measure are dropped
/// with a warning. The same entity appearing twice in one group is an error.
pub fn normalize(records: &[InvestmentRecord], deviation: Deviation) -> Result<Vec<InvestmentSignal>> {
    let mut seen: HashSet<(&str, i32, &str)> = HashSet::new();
    let mut groups: BTreeMap<(i32, &str), Vec<usize>> = BTreeMap::new();

    for (i, record) in records.iter().enumerate() {
        if !record.raw_measure.is_finite() {
            warn!(
                "Dropping investment entry for {} ({} {}): non-finite measure",
                record.entity, record.period, record.role
            );
            continue;
        }
        if !seen.insert((record.entity.as_str(), record.period, record.role.as_str())) {
            return Err(EngineError::DuplicateInvestmentEntry {
                entity: record.entity.clone(),
                period: record.period,
                role: record.role.clone(),
            });
        }
        groups
            .entry((record.period, record.role.as_str()))
            .or_default()
            .push(i);
    }

    let mut z_by_index: BTreeMap<usize, f64> = BTreeMap::new();
    for members in groups.values() {
        let values: Vec<f64> = members.iter().map(|&i| records[i].raw_measure).collect();
        let stats = group_stats(&values, deviation);
        for (&i, &value) in members.iter().zip(&values) {
            z_by_index.insert(i, zscore(value, stats));
        }
    }

    Ok(z_by_index
        .into_iter()
        .map(|(i, z)| {
            let record = &records[i];
            InvestmentSignal {
                entity: record.entity.clone(),
                period: record.period,
                role: record.role.clone(),
                raw_measure: record.raw_measure,
                z_score: z,
                tier: InvestmentTier::from_zscore(z),
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
