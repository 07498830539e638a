// Position value model: regress a draft-outcome proxy from prepared
// features, then map predictions onto a bounded 0-100 value score.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::preprocess::FeatureMatrix;
use crate::record::DraftOutcome;

/// Upper bound of the value score.
pub const MAX_SCORE: f64 = 100.0;

/// Score assigned to every prediction when the training targets had no spread.
pub const DEGENERATE_SCORE: f64 = 50.0;

const RANGE_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Outcome proxy
// ---------------------------------------------------------------------------

/// Round buckets used by `OutcomeProxy::RoundBucket`: (last round, bucket).
const ROUND_BUCKETS: &[(u32, f64)] = &[(2, 1.0), (4, 2.0), (u32::MAX, 3.0)];

/// Bucket assigned to undrafted athletes under `OutcomeProxy::RoundBucket`.
const UNDRAFTED_BUCKET: f64 = 4.0;

/// The quantity the regression learns. Smaller is better for every proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeProxy {
    /// Overall pick number.
    #[default]
    OverallPick,
    /// Rounds 1-2 -> 1, rounds 3-4 -> 2, later -> 3.
    RoundBucket,
}

impl OutcomeProxy {
    /// Proxy value for an athlete who was drafted.
    pub fn target(&self, outcome: &DraftOutcome) -> f64 {
        match self {
            OutcomeProxy::OverallPick => outcome.pick as f64,
            OutcomeProxy::RoundBucket => ROUND_BUCKETS
                .iter()
                .find(|(last_round, _)| outcome.round <= *last_round)
                .map(|(_, bucket)| *bucket)
                .unwrap_or(UNDRAFTED_BUCKET),
        }
    }

    /// Proxy value for an athlete who went undrafted, given the configured
    /// stand-in pick.
    pub fn undrafted_target(&self, undrafted_pick: u32) -> f64 {
        match self {
            OutcomeProxy::OverallPick => undrafted_pick as f64,
            OutcomeProxy::RoundBucket => UNDRAFTED_BUCKET,
        }
    }

    /// Training target for an optional outcome; `None` when the athlete is
    /// undrafted and undrafted athletes are excluded.
    pub fn target_for(&self, outcome: Option<&DraftOutcome>, undrafted_pick: Option<u32>) -> Option<f64> {
        match (outcome, undrafted_pick) {
            (Some(o), _) => Some(self.target(o)),
            (None, Some(pick)) => Some(self.undrafted_target(pick)),
            (None, None) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Tie-break noise. Uniform in [-magnitude, +magnitude], so no score moves by
/// more than `magnitude`. A magnitude of 0 disables it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseOptions {
    #[serde(default)]
    pub magnitude: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

impl Default for NoiseOptions {
    fn default() -> Self {
        Self {
            magnitude: 0.0,
            seed: default_seed(),
        }
    }
}

impl NoiseOptions {
    pub fn enabled(&self) -> bool {
        self.magnitude > 0.0
    }
}

fn default_ridge_lambda() -> f64 {
    1.0
}

fn default_min_samples() -> usize {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    #[serde(default)]
    pub proxy: OutcomeProxy,
    /// L2 penalty on the feature weights (the intercept is not penalized).
    #[serde(default = "default_ridge_lambda")]
    pub ridge_lambda: f64,
    /// Fewest training rows a group needs before it is fitted.
    #[serde(default = "default_min_samples")]
    pub min_training_samples: usize,
    /// Stand-in pick for undrafted athletes; `None` excludes them from training.
    #[serde(default)]
    pub undrafted_pick: Option<u32>,
    #[serde(default)]
    pub noise: NoiseOptions,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            proxy: OutcomeProxy::default(),
            ridge_lambda: default_ridge_lambda(),
            min_training_samples: default_min_samples(),
            undrafted_pick: None,
            noise: NoiseOptions::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Score scale
// ---------------------------------------------------------------------------

/// Min-max bounds of the inverted proxy, fixed at training time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreScale {
    pub inverted_min: f64,
    pub inverted_max: f64,
}

impl ScoreScale {
    /// Fit bounds from training targets (smaller target = better).
    pub fn fit(targets: &[f64]) -> Self {
        let inverted_min = targets.iter().map(|t| -t).fold(f64::INFINITY, f64::min);
        let inverted_max = targets.iter().map(|t| -t).fold(f64::NEG_INFINITY, f64::max);
        Self {
            inverted_min,
            inverted_max,
        }
    }

    /// Map a proxy value (predicted or actual) to a score in [0, 100].
    pub fn score(&self, proxy_value: f64) -> f64 {
        let span = self.inverted_max - self.inverted_min;
        if !span.is_finite() || span < RANGE_EPSILON {
            return DEGENERATE_SCORE;
        }
        let scaled = (-proxy_value - self.inverted_min) / span * MAX_SCORE;
        scaled.clamp(0.0, MAX_SCORE)
    }
}

// ---------------------------------------------------------------------------
// Model interface
// ---------------------------------------------------------------------------

/// A per-position model that learns a draft-outcome proxy and scores
/// prospects on the 0-100 value scale.
pub trait ValueModel {
    /// Fit on a prepared matrix and one proxy target per row.
    fn train(&mut self, features: &FeatureMatrix, targets: &[f64]) -> Result<()>;

    /// Predicted proxy value per row (e.g. predicted pick number).
    fn predict_outcome(&self, features: &FeatureMatrix) -> Result<Vec<f64>>;

    /// Value score per row, in [0, 100].
    fn predict_value(&self, features: &FeatureMatrix) -> Result<Vec<f64>>;

    /// Map known proxy values onto the same score scale as `predict_value`.
    fn outcome_to_value_score(&self, outcomes: &[f64]) -> Result<Vec<f64>>;
}

// ---------------------------------------------------------------------------
// Ridge regression model
// ---------------------------------------------------------------------------

/// Fitted ridge coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeFit {
    pub columns: Vec<String>,
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub scale: ScoreScale,
    pub training_rows: usize,
}

/// Ridge regression of the outcome proxy on the prepared features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeDraftModel {
    pub group: String,
    pub options: ModelOptions,
    pub fit: Option<RidgeFit>,
}

impl RidgeDraftModel {
    pub fn new(group: &str, options: ModelOptions) -> Self {
        Self {
            group: group.to_string(),
            options,
            fit: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.fit.is_some()
    }

    fn fitted(&self) -> Result<&RidgeFit> {
        self.fit
            .as_ref()
            .ok_or_else(|| EngineError::ModelNotTrained(self.group.clone()))
    }

    fn check_width(&self, fit: &RidgeFit, features: &FeatureMatrix) -> Result<()> {
        if features.columns != fit.columns || features.width() != fit.weights.len() {
            return Err(EngineError::FeatureMismatch {
                group: self.group.clone(),
                expected: fit.columns.len(),
                found: features.width(),
            });
        }
        Ok(())
    }

    fn apply_noise(&self, scores: &mut [f64]) {
        let noise = self.options.noise;
        if !noise.enabled() {
            return;
        }
        let mut rng = StdRng::seed_from_u64(noise.seed);
        for score in scores.iter_mut() {
            let jitter = rng.gen_range(-noise.magnitude..=noise.magnitude);
            *score = (*score + jitter).clamp(0.0, MAX_SCORE);
        }
    }
}

impl ValueModel for RidgeDraftModel {
    fn train(&mut self, features: &FeatureMatrix, targets: &[f64]) -> Result<()> {
        if features.len() != targets.len() {
            return Err(EngineError::LengthMismatch {
                features: features.len(),
                outcomes: targets.len(),
            });
        }
        let required = self.options.min_training_samples.max(1);
        if features.len() < required {
            return Err(EngineError::InsufficientData {
                group: self.group.clone(),
                found: features.len(),
                required,
            });
        }

        let y = Array1::from(targets.to_vec());
        let (weights, intercept) = fit_ridge(&features.values, &y, self.options.ridge_lambda)
            .ok_or_else(|| EngineError::SingularSystem(self.group.clone()))?;

        self.fit = Some(RidgeFit {
            columns: features.columns.clone(),
            weights: weights.to_vec(),
            intercept,
            scale: ScoreScale::fit(targets),
            training_rows: features.len(),
        });
        Ok(())
    }

    fn predict_outcome(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        let fit = self.fitted()?;
        self.check_width(fit, features)?;
        let weights = Array1::from(fit.weights.clone());
        let predicted = features.values.dot(&weights) + fit.intercept;
        Ok(predicted.to_vec())
    }

    fn predict_value(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        let fit = self.fitted()?;
        let mut scores: Vec<f64> = self
            .predict_outcome(features)?
            .into_iter()
            .map(|p| fit.scale.score(p))
            .collect();
        self.apply_noise(&mut scores);
        Ok(scores)
    }

    fn outcome_to_value_score(&self, outcomes: &[f64]) -> Result<Vec<f64>> {
        let fit = self.fitted()?;
        Ok(outcomes.iter().map(|o| fit.scale.score(*o)).collect())
    }
}

// ---------------------------------------------------------------------------
// Linear algebra
// ---------------------------------------------------------------------------

/// Closed-form ridge regression with an unpenalized intercept.
///
/// Centers features and targets, solves `(XᵀX + λI) w = Xᵀy` by Cholesky
/// decomposition, and recovers the intercept from the means. Returns `None`
/// when the system is not positive definite (only possible with λ = 0).
pub fn fit_ridge(x: &Array2<f64>, y: &Array1<f64>, lambda: f64) -> Option<(Array1<f64>, f64)> {
    if x.nrows() == 0 || x.nrows() != y.len() {
        return None;
    }
    let x_mean = x.mean_axis(Axis(0))?;
    let y_mean = y.mean()?;
    if x.ncols() == 0 {
        return Some((Array1::zeros(0), y_mean));
    }

    let x_centered = x - &x_mean;
    let y_centered = y - y_mean;

    let mut gram = x_centered.t().dot(&x_centered);
    gram.diag_mut().mapv_inplace(|d| d + lambda);
    let rhs = x_centered.t().dot(&y_centered);

    let weights = cholesky_solve(&gram, &rhs)?;
    let intercept = y_mean - x_mean.dot(&weights);
    Some((weights, intercept))
}

/// Solve `A x = b` for symmetric positive-definite `A`.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let floor = pivot_floor(a);
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let d = a[[i, i]] - sum;
                if d <= floor || !d.is_finite() {
                    return None;
                }
                l[[i, i]] = d.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|k| l[[i, k]] * z[k]).sum();
        z[i] = (b[i] - sum) / l[[i, i]];
    }
    // Lᵀ x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|k| l[[k, i]] * x[k]).sum();
        x[i] = (z[i] - sum) / l[[i, i]];
    }
    Some(x)
}

/// Smallest pivot accepted as positive, relative to the largest diagonal entry.
fn pivot_floor(a: &Array2<f64>) -> f64 {
    let largest = a.diag().iter().fold(0.0_f64, |m, d| m.max(d.abs()));
    RANGE_EPSILON * largest.max(1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
