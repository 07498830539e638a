// Accuracy and distribution metrics for predicted value scores.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

const VARIANCE_EPSILON: f64 = 1e-12;

/// Spread of the predicted scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreDistribution {
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
}

/// How closely predicted value scores track the scores of the actual
/// outcomes, for one position group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvaluation {
    pub group: String,
    pub samples: usize,
    pub mae: f64,
    pub rmse: f64,
    pub r_squared: f64,
    pub predicted: ScoreDistribution,
}

/// Compare `predicted` scores with `actual` scores (both on the 0-100 scale).
///
/// Returns `None` for an empty cohort.
pub fn evaluate(group: &str, predicted: &[f64], actual: &[f64]) -> Result<Option<PositionEvaluation>> {
    if predicted.len() != actual.len() {
        return Err(EngineError::LengthMismatch {
            features: predicted.len(),
            outcomes: actual.len(),
        });
    }
    if predicted.is_empty() {
        return Ok(None);
    }

    let n = predicted.len() as f64;
    let errors: Vec<f64> = predicted.iter().zip(actual).map(|(p, a)| p - a).collect();
    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
    let ss_res: f64 = errors.iter().map(|e| e * e).sum();
    let rmse = (ss_res / n).sqrt();

    let actual_mean = actual.iter().sum::<f64>() / n;
    let ss_tot: f64 = actual.iter().map(|a| (a - actual_mean).powi(2)).sum();
    let r_squared = if ss_tot < VARIANCE_EPSILON {
        // Constant actuals: a perfect fit is 1, anything else explains nothing.
        if ss_res < VARIANCE_EPSILON {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    };

    Ok(Some(PositionEvaluation {
        group: group.to_string(),
        samples: predicted.len(),
        mae,
        rmse,
        r_squared,
        predicted: distribution(predicted),
    }))
}

fn distribution(values: &[f64]) -> ScoreDistribution {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    ScoreDistribution {
        mean,
        std,
        p25: percentile(&sorted, 25.0),
        p50: percentile(&sorted, 50.0),
        p75: percentile(&sorted, 75.0),
    }
}

/// Linear-interpolation percentile of an ascending slice.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => return 0.0,
        1 => return sorted[0],
        _ => {}
    }
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
