// Feature preparation: imputation, standardization, and one-hot encoding,
// fitted once per position group on a training cohort and reused unchanged
// for every later transform.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::record::AthleteRecord;
use crate::registry::{PositionSchema, SchemaRegistry};

/// Category used in place of a missing categorical value.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Threshold below which a column's standard deviation is treated as zero.
const SCALE_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// How a missing numeric value is filled before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    /// Training-cohort mean of the column (0.0 if never observed).
    #[default]
    Mean,
    /// Constant 0.0.
    Zero,
}

/// Which seasons feed the numeric features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonSelection {
    /// The most recent snapshot only.
    #[default]
    Latest,
    /// Per-field mean over every snapshot in which the field is present.
    CareerAverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PreprocessOptions {
    #[serde(default)]
    pub impute: ImputeStrategy,
    #[serde(default)]
    pub season: SeasonSelection,
}

// ---------------------------------------------------------------------------
// Feature matrix
// ---------------------------------------------------------------------------

/// Dense feature matrix: one row per record, columns named.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Self {
        Self { columns, values }
    }

    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }
}

// ---------------------------------------------------------------------------
// Fitted parameters
// ---------------------------------------------------------------------------

/// Fill value and standardization constants for one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericColumn {
    pub name: String,
    pub fill: f64,
    pub mean: f64,
    pub scale: f64,
}

/// Sorted vocabulary for one categorical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalColumn {
    pub name: String,
    pub vocabulary: Vec<String>,
}

/// Preprocessing parameters fitted for one position group.
///
/// Callers that need reproducible transforms hold on to this value; nothing
/// in it changes after `fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    pub group: String,
    pub schema: PositionSchema,
    pub options: PreprocessOptions,
    pub numeric: Vec<NumericColumn>,
    pub categorical: Vec<CategoricalColumn>,
}

impl FittedPipeline {
    /// Fit imputation, scaling and vocabularies on `records` and return the
    /// pipeline with the transformed training matrix.
    pub fn fit(
        schema: &PositionSchema,
        records: &[&AthleteRecord],
        options: PreprocessOptions,
    ) -> Result<(Self, FeatureMatrix)> {
        if records.is_empty() {
            return Err(EngineError::InsufficientData {
                group: schema.group.clone(),
                found: 0,
                required: 1,
            });
        }

        let numeric = schema
            .numeric
            .iter()
            .map(|field| fit_numeric(field, records, options))
            .collect();

        let categorical = schema
            .categorical
            .iter()
            .map(|field| {
                let vocabulary: BTreeSet<String> = records
                    .iter()
                    .map(|r| category_of(r, field).to_string())
                    .collect();
                CategoricalColumn {
                    name: field.clone(),
                    vocabulary: vocabulary.into_iter().collect(),
                }
            })
            .collect();

        let pipeline = Self {
            group: schema.group.clone(),
            schema: schema.clone(),
            options,
            numeric,
            categorical,
        };
        let matrix = pipeline.transform(records);
        Ok((pipeline, matrix))
    }

    /// Apply the fitted parameters. Categories not seen at fit time encode
    /// as all zeros.
    pub fn transform(&self, records: &[&AthleteRecord]) -> FeatureMatrix {
        let mut values = Array2::<f64>::zeros((records.len(), self.width()));
        let mut unseen = 0usize;
        for (mut row, record) in values.rows_mut().into_iter().zip(records) {
            for (j, col) in self.numeric.iter().enumerate() {
                let raw = numeric_value(record, &col.name, self.options.season).unwrap_or(col.fill);
                row[j] = (raw - col.mean) / col.scale;
            }
            let mut offset = self.numeric.len();
            for col in &self.categorical {
                match col.vocabulary.iter().position(|v| v == category_of(record, &col.name)) {
                    Some(hit) => row[offset + hit] = 1.0,
                    None => unseen += 1,
                }
                offset += col.vocabulary.len();
            }
        }

        if unseen > 0 {
            debug!(
                "{}: {} categorical values were not in the fitted vocabulary",
                self.group, unseen
            );
        }

        FeatureMatrix::new(self.column_names(), values)
    }

    /// Output column names: numeric fields, then `field=category` indicators.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numeric.iter().map(|c| c.name.clone()).collect();
        for col in &self.categorical {
            names.extend(col.vocabulary.iter().map(|v| format!("{}={}", col.name, v)));
        }
        names
    }

    pub fn width(&self) -> usize {
        self.numeric.len()
            + self
                .categorical
                .iter()
                .map(|c| c.vocabulary.len())
                .sum::<usize>()
    }
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

/// Read a numeric field for a record under the given season selection.
pub fn numeric_value(record: &AthleteRecord, field: &str, season: SeasonSelection) -> Option<f64> {
    match season {
        SeasonSelection::Latest => record.latest_snapshot().and_then(|s| s.stat(field)),
        SeasonSelection::CareerAverage => {
            let values: Vec<f64> = record.snapshots.iter().filter_map(|s| s.stat(field)).collect();
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
    }
}

fn category_of<'a>(record: &'a AthleteRecord, field: &str) -> &'a str {
    record.label(field).unwrap_or(UNKNOWN_CATEGORY)
}

fn fit_numeric(field: &str, records: &[&AthleteRecord], options: PreprocessOptions) -> NumericColumn {
    let observed: Vec<Option<f64>> = records
        .iter()
        .map(|r| numeric_value(r, field, options.season))
        .collect();

    let present: Vec<f64> = observed.iter().flatten().copied().collect();
    let fill = match options.impute {
        ImputeStrategy::Zero => 0.0,
        ImputeStrategy::Mean if present.is_empty() => 0.0,
        ImputeStrategy::Mean => present.iter().sum::<f64>() / present.len() as f64,
    };

    let imputed: Vec<f64> = observed.iter().map(|v| v.unwrap_or(fill)).collect();
    let n = imputed.len() as f64;
    let mean = imputed.iter().sum::<f64>() / n;
    let std = (imputed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let constant = imputed.windows(2).all(|w| w[0] == w[1]);
    let scale = if constant || std < SCALE_EPSILON { 1.0 } else { std };

    NumericColumn {
        name: field.to_string(),
        fill,
        mean,
        scale,
    }
}

// ---------------------------------------------------------------------------
// Keyed preprocessor
// ---------------------------------------------------------------------------

/// Holds one fitted pipeline per position group.
///
/// `fit_transform` is the only way parameters are created; `transform`
/// refuses to run for a group that has not been fitted, so evaluation-time
/// data can never leak into imputation or scaling.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    registry: SchemaRegistry,
    options: PreprocessOptions,
    pipelines: BTreeMap<String, FittedPipeline>,
}

impl Preprocessor {
    pub fn new(registry: SchemaRegistry, options: PreprocessOptions) -> Self {
        Self {
            registry,
            options,
            pipelines: BTreeMap::new(),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn options(&self) -> PreprocessOptions {
        self.options
    }

    /// Fit parameters for `position`'s group on `records`, replacing any
    /// earlier fit, and return the transformed matrix.
    pub fn fit_transform(&mut self, records: &[AthleteRecord], position: &str) -> Result<FeatureMatrix> {
        let schema = self.registry.resolve(position)?;
        let refs: Vec<&AthleteRecord> = records.iter().collect();
        let (pipeline, matrix) = FittedPipeline::fit(schema, &refs, self.options)?;
        self.install(pipeline);
        Ok(matrix)
    }

    /// Transform `records` with the parameters already fitted for
    /// `position`'s group.
    pub fn transform(&self, records: &[AthleteRecord], position: &str) -> Result<FeatureMatrix> {
        let refs: Vec<&AthleteRecord> = records.iter().collect();
        Ok(self.pipeline(position)?.transform(&refs))
    }

    /// The fitted pipeline for a position's group. A pipeline fitted against
    /// a schema whose fields have since changed counts as not fitted.
    pub fn pipeline(&self, position: &str) -> Result<&FittedPipeline> {
        let schema = self.registry.resolve(position)?;
        self.pipelines
            .get(&schema.group)
            .filter(|p| p.schema.same_fields(schema))
            .ok_or_else(|| EngineError::NotFitted(schema.group.clone()))
    }

    /// Store an externally fitted pipeline under its group.
    pub fn install(&mut self, pipeline: FittedPipeline) {
        self.pipelines.insert(pipeline.group.clone(), pipeline);
    }

    /// Swap the registry, dropping pipelines whose group's fields changed or
    /// whose group no longer exists. Returns the dropped groups.
    pub fn replace_registry(&mut self, registry: SchemaRegistry) -> Vec<String> {
        let stale: Vec<String> = self
            .pipelines
            .values()
            .filter(|p| match registry.resolve(&p.group) {
                Ok(schema) => schema.group != p.group || !schema.same_fields(&p.schema),
                Err(_) => true,
            })
            .map(|p| p.group.clone())
            .collect();
        for group in &stale {
            self.pipelines.remove(group);
        }
        self.registry = registry;
        stale
    }

    pub fn fitted_groups(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;
    use crate::record::StatSnapshot;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn tiny_registry() -> SchemaRegistry {
        SchemaRegistry::new(vec![PositionSchema::new(
            "QB",
            &["QB"],
            &["pass_yards", "pass_rating"],
            &["school"],
        )])
        .unwrap()
    }

    fn qb(name: &str, school: Option<&str>, yards: Option<f64>, rating: Option<f64>) -> AthleteRecord {
        let mut snap = StatSnapshot::new(2023);
        if let Some(y) = yards {
            snap = snap.with_stat("pass_yards", y);
        }
        if let Some(r) = rating {
            snap = snap.with_stat("pass_rating", r);
        }
        AthleteRecord::new(name, "QB", school).with_snapshot(snap)
    }

    #[test]
    fn transform_before_fit_is_not_fitted() {
        let pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        let err = pre.transform(&[qb("A", None, Some(1.0), None)], "QB").unwrap_err();
        assert_eq!(err, EngineError::NotFitted("QB".into()));
    }

    #[test]
    fn unknown_position_fails_fit() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        let err = pre.fit_transform(&[qb("A", None, None, None)], "WR").unwrap_err();
        assert_eq!(err, EngineError::UnknownPosition("WR".into()));
    }

    #[test]
    fn numeric_columns_are_standardized() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        let records = vec![
            qb("A", Some("X"), Some(1000.0), Some(100.0)),
            qb("B", Some("X"), Some(3000.0), Some(140.0)),
        ];
        let m = pre.fit_transform(&records, "QB").unwrap();
        // mean 2000, population std 1000
        assert!(approx_eq(m.values[[0, 0]], -1.0, 1e-12));
        assert!(approx_eq(m.values[[1, 0]], 1.0, 1e-12));
        assert!(approx_eq(m.values[[0, 1]], -1.0, 1e-12));
    }

    #[test]
    fn mean_imputation_lands_on_zero_after_scaling() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        let records = vec![
            qb("A", None, Some(1000.0), Some(100.0)),
            qb("B", None, Some(3000.0), Some(140.0)),
            qb("C", None, None, None),
        ];
        let m = pre.fit_transform(&records, "QB").unwrap();
        assert!(approx_eq(m.values[[2, 0]], 0.0, 1e-12));
        assert!(approx_eq(m.values[[2, 1]], 0.0, 1e-12));

        let fitted = pre.pipeline("QB").unwrap();
        assert!(approx_eq(fitted.numeric[0].fill, 2000.0, 1e-9));
    }

    #[test]
    fn zero_imputation_fills_with_zero() {
        let options = PreprocessOptions {
            impute: ImputeStrategy::Zero,
            ..PreprocessOptions::default()
        };
        let mut pre = Preprocessor::new(tiny_registry(), options);
        let records = vec![
            qb("A", None, Some(3000.0), Some(120.0)),
            qb("B", None, None, Some(120.0)),
        ];
        pre.fit_transform(&records, "QB").unwrap();
        let fitted = pre.pipeline("QB").unwrap();
        assert_eq!(fitted.numeric[0].fill, 0.0);
        // imputed column [3000, 0]: mean 1500
        assert!(approx_eq(fitted.numeric[0].mean, 1500.0, 1e-9));
        // constant column keeps unit scale
        assert_eq!(fitted.numeric[1].scale, 1.0);
    }

    #[test]
    fn constant_large_column_keeps_unit_scale() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        let records: Vec<AthleteRecord> = (0..6)
            .map(|i| qb(&format!("Q{i}"), None, Some(20_000_000.04), Some(100.0 + i as f64)))
            .collect();
        let m = pre.fit_transform(&records, "QB").unwrap();
        assert_eq!(pre.pipeline("QB").unwrap().numeric[0].scale, 1.0);
        assert!(m.values.column(0).iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn never_observed_column_imputes_zero_and_stays_finite() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        let records = vec![qb("A", None, None, None), qb("B", None, None, None)];
        let m = pre.fit_transform(&records, "QB").unwrap();
        assert!(m.values.iter().all(|v| v.is_finite()));
        assert_eq!(pre.pipeline("QB").unwrap().numeric[0].fill, 0.0);
    }

    #[test]
    fn categorical_one_hot_uses_sorted_vocabulary_with_unknown() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        let records = vec![
            qb("A", Some("USC"), Some(1.0), Some(1.0)),
            qb("B", None, Some(2.0), Some(2.0)),
            qb("C", Some("LSU"), Some(3.0), Some(3.0)),
        ];
        let m = pre.fit_transform(&records, "QB").unwrap();
        assert_eq!(
            m.columns,
            vec![
                "pass_yards",
                "pass_rating",
                "school=LSU",
                "school=USC",
                "school=Unknown"
            ]
        );
        assert_eq!(m.values.slice(s![0, 2..]).to_vec(), vec![0.0, 1.0, 0.0]);
        assert_eq!(m.values.slice(s![1, 2..]).to_vec(), vec![0.0, 0.0, 1.0]);
        assert_eq!(m.values.slice(s![2, 2..]).to_vec(), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn unseen_category_encodes_as_zeros() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        pre.fit_transform(&[qb("A", Some("USC"), Some(1.0), Some(1.0))], "QB")
            .unwrap();
        let m = pre
            .transform(&[qb("Z", Some("Oregon"), Some(1.0), Some(1.0))], "QB")
            .unwrap();
        assert_eq!(m.width(), 3);
        assert_eq!(m.values[[0, 2]], 0.0);
    }

    #[test]
    fn transform_uses_training_statistics() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        pre.fit_transform(
            &[
                qb("A", None, Some(1000.0), Some(100.0)),
                qb("B", None, Some(3000.0), Some(140.0)),
            ],
            "QB",
        )
        .unwrap();
        // A lone evaluation row must be scaled with training mean/std, not its own.
        let m = pre
            .transform(&[qb("C", None, Some(4000.0), Some(160.0))], "QB")
            .unwrap();
        assert!(approx_eq(m.values[[0, 0]], 2.0, 1e-12));
        assert!(approx_eq(m.values[[0, 1]], 2.0, 1e-12));
    }

    #[test]
    fn refit_replaces_earlier_parameters() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        pre.fit_transform(
            &[
                qb("A", None, Some(0.0), Some(0.0)),
                qb("B", None, Some(10.0), Some(10.0)),
            ],
            "QB",
        )
        .unwrap();
        pre.fit_transform(
            &[
                qb("A", None, Some(100.0), Some(0.0)),
                qb("B", None, Some(300.0), Some(10.0)),
            ],
            "QB",
        )
        .unwrap();
        let m = pre.transform(&[qb("C", None, Some(200.0), None)], "QB").unwrap();
        assert!(approx_eq(m.values[[0, 0]], 0.0, 1e-12));
    }

    #[test]
    fn career_average_uses_every_season_with_the_field() {
        let record = AthleteRecord::new("A", "QB", None)
            .with_snapshot(StatSnapshot::new(2021).with_stat("pass_yards", 1000.0))
            .with_snapshot(StatSnapshot::new(2022))
            .with_snapshot(StatSnapshot::new(2023).with_stat("pass_yards", 3000.0));
        assert_eq!(
            numeric_value(&record, "pass_yards", SeasonSelection::CareerAverage),
            Some(2000.0)
        );
        assert_eq!(
            numeric_value(&record, "pass_yards", SeasonSelection::Latest),
            Some(3000.0)
        );
    }

    #[test]
    fn fields_outside_the_schema_are_ignored() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        let record = AthleteRecord::new("A", "QB", None).with_snapshot(
            StatSnapshot::new(2023)
                .with_stat("pass_yards", 10.0)
                .with_stat("receiving_yards", 999.0),
        );
        let m = pre.fit_transform(&[record], "QB").unwrap();
        assert!(!m.columns.iter().any(|c| c.contains("receiving")));
    }

    #[test]
    fn registry_change_invalidates_pipeline() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        pre.fit_transform(&[qb("A", None, Some(1.0), Some(1.0))], "QB")
            .unwrap();

        let changed = SchemaRegistry::new(vec![PositionSchema::new(
            "QB",
            &["QB"],
            &["pass_yards"],
            &["school"],
        )])
        .unwrap();
        let dropped = pre.replace_registry(changed);
        assert_eq!(dropped, vec!["QB".to_string()]);
        assert_eq!(
            pre.transform(&[qb("A", None, None, None)], "QB").unwrap_err(),
            EngineError::NotFitted("QB".into())
        );
    }

    #[test]
    fn registry_alias_change_keeps_pipeline() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        pre.fit_transform(&[qb("A", None, Some(1.0), Some(1.0))], "QB")
            .unwrap();
        let same_fields = SchemaRegistry::new(vec![PositionSchema::new(
            "QB",
            &["QB", "SIGNAL CALLER"],
            &["pass_yards", "pass_rating"],
            &["school"],
        )])
        .unwrap();
        assert!(pre.replace_registry(same_fields).is_empty());
        assert!(pre.pipeline("signal caller").is_ok());
    }

    #[test]
    fn empty_cohort_is_insufficient() {
        let mut pre = Preprocessor::new(tiny_registry(), PreprocessOptions::default());
        assert!(matches!(
            pre.fit_transform(&[], "QB").unwrap_err(),
            EngineError::InsufficientData { found: 0, .. }
        ));
    }
}
