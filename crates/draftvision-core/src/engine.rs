// Batch orchestration: per-group training, scoring, ranking and evaluation.
//
// Records are routed to position groups through the schema registry. Each
// group owns one fitted pipeline and one model; groups never share state, so
// the per-group work runs in parallel and is merged back in group order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::evaluation::{self, PositionEvaluation};
use crate::investment::{self, Deviation, InvestmentRecord, InvestmentSignal};
use crate::model::{ModelOptions, RidgeDraftModel, ValueModel};
use crate::preprocess::{FittedPipeline, PreprocessOptions, Preprocessor};
use crate::ranking::{self, RankingEntry, ScoredAthlete};
use crate::record::AthleteRecord;
use crate::registry::{PositionSchema, SchemaRegistry};

// ---------------------------------------------------------------------------
// Options and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default)]
    pub preprocess: PreprocessOptions,
    #[serde(default)]
    pub model: ModelOptions,
    #[serde(default)]
    pub investment: Deviation,
}

/// A fitted pipeline together with the model trained on its output. This
/// is the unit that is exported and reloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedPositionModel {
    pub group: String,
    pub pipeline: FittedPipeline,
    pub model: RidgeDraftModel,
}

/// A position group that was left out of a batch step, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedGroup {
    pub group: String,
    pub reason: EngineError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupTraining {
    pub group: String,
    /// Rows the model was fitted on.
    pub rows: usize,
    /// Rows left out because they had no usable outcome.
    pub unlabeled: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub trained: Vec<GroupTraining>,
    pub skipped: Vec<SkippedGroup>,
    /// Records whose position matched no registered group.
    pub excluded: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringReport {
    /// Scored athletes per group, in group order.
    pub groups: Vec<(String, Vec<ScoredAthlete>)>,
    pub skipped: Vec<SkippedGroup>,
    pub excluded: usize,
}

impl ScoringReport {
    pub fn scored(&self) -> usize {
        self.groups.iter().map(|(_, athletes)| athletes.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingReport {
    pub entries: Vec<RankingEntry>,
    pub skipped: Vec<SkippedGroup>,
    pub excluded: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Owns the registry, the fitted pipelines and one model per position group.
#[derive(Debug, Clone)]
pub struct ValuationEngine {
    preprocessor: Preprocessor,
    models: BTreeMap<String, RidgeDraftModel>,
    options: EngineOptions,
}

type Partition<'a> = (Vec<(String, Vec<&'a AthleteRecord>)>, usize);

impl ValuationEngine {
    pub fn new(registry: SchemaRegistry, options: EngineOptions) -> Self {
        Self {
            preprocessor: Preprocessor::new(registry, options.preprocess),
            models: BTreeMap::new(),
            options,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        self.preprocessor.registry()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Install a new registry. Every group whose field lists changed (or that
    /// disappeared) loses its pipeline and model and must be retrained.
    /// Returns the invalidated groups.
    pub fn set_registry(&mut self, registry: SchemaRegistry) -> Vec<String> {
        let dropped = self.preprocessor.replace_registry(registry);
        self.models.retain(|group, _| !dropped.contains(group));
        for group in &dropped {
            info!("Registry change invalidated model for {}", group);
        }
        dropped
    }

    /// Split records by position group, in group order. Records with an
    /// unregistered position are counted, not returned.
    fn partition<'a>(&self, records: &'a [AthleteRecord]) -> Partition<'a> {
        let mut groups: BTreeMap<String, Vec<&'a AthleteRecord>> = BTreeMap::new();
        let mut excluded = 0usize;
        for record in records {
            match self.registry().group_of(&record.position) {
                Ok(group) => groups.entry(group.to_string()).or_default().push(record),
                Err(_) => {
                    debug!("No position group for {} ({})", record.name, record.position);
                    excluded += 1;
                }
            }
        }
        if excluded > 0 {
            warn!("{} records excluded: position not in registry", excluded);
        }
        (groups.into_iter().collect(), excluded)
    }

    // ---- Training ----

    /// Fit a pipeline and model for every group present in `records`.
    ///
    /// A group with too few labelled rows, or whose regression is singular,
    /// is skipped with a warning and loses any model it had. Other groups
    /// still train.
    pub fn train(&mut self, records: &[AthleteRecord]) -> Result<TrainingReport> {
        let (groups, excluded) = self.partition(records);
        let options = self.options;
        let registry = self.preprocessor.registry();

        let outcomes: Vec<(String, usize, usize, Result<TrainedPositionModel>)> = groups
            .into_par_iter()
            .map(|(group, rows)| {
                let total = rows.len();
                let result = registry
                    .resolve(&group)
                    .and_then(|schema| fit_group(schema, &rows, options));
                let used = result.as_ref().map(|t| t.model_rows()).unwrap_or(0);
                (group, total, used, result)
            })
            .collect();

        let mut report = TrainingReport {
            excluded,
            ..TrainingReport::default()
        };
        for (group, total, used, result) in outcomes {
            match result {
                Ok(trained) => {
                    info!("Trained {} on {} rows", group, used);
                    self.install_unchecked(trained);
                    report.trained.push(GroupTraining {
                        group,
                        rows: used,
                        unlabeled: total - used,
                    });
                }
                Err(err @ (EngineError::InsufficientData { .. } | EngineError::SingularSystem(_))) => {
                    warn!("Skipping {}: {}", group, err);
                    self.models.remove(&group);
                    report.skipped.push(SkippedGroup { group, reason: err });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    /// Train one position's group on `records`, all of which are taken to
    /// belong to it. Unlike `train`, insufficient data is an error here.
    pub fn train_group(&mut self, position: &str, records: &[AthleteRecord]) -> Result<()> {
        let schema = self.registry().resolve(position)?;
        let refs: Vec<&AthleteRecord> = records.iter().collect();
        let trained = fit_group(schema, &refs, self.options)?;
        self.install_unchecked(trained);
        Ok(())
    }

    fn install_unchecked(&mut self, trained: TrainedPositionModel) {
        self.preprocessor.install(trained.pipeline);
        self.models.insert(trained.group, trained.model);
    }

    /// Reload a previously exported model. Rejected as not fitted when the
    /// registry's fields for its group no longer match.
    pub fn install(&mut self, trained: TrainedPositionModel) -> Result<()> {
        let schema = self.registry().resolve(&trained.group)?;
        if schema.group != trained.group || !schema.same_fields(&trained.pipeline.schema) {
            return Err(EngineError::NotFitted(trained.group));
        }
        self.install_unchecked(trained);
        Ok(())
    }

    pub fn is_trained(&self, position: &str) -> bool {
        self.model_for(position).is_ok()
    }

    /// The trained model for a position's group.
    pub fn model_for(&self, position: &str) -> Result<&RidgeDraftModel> {
        let group = self.registry().group_of(position)?;
        self.models
            .get(group)
            .ok_or_else(|| EngineError::ModelNotTrained(group.to_string()))
    }

    /// Snapshot of every trained group, in group order.
    pub fn trained_models(&self) -> Vec<TrainedPositionModel> {
        self.models
            .iter()
            .filter_map(|(group, model)| {
                let pipeline = self.preprocessor.pipeline(group).ok()?;
                Some(TrainedPositionModel {
                    group: group.clone(),
                    pipeline: pipeline.clone(),
                    model: model.clone(),
                })
            })
            .collect()
    }

    // ---- Scoring ----

    /// Value scores for `records`, all of which belong to `position`'s group.
    pub fn predict_value(&self, position: &str, records: &[AthleteRecord]) -> Result<Vec<f64>> {
        let model = self.model_for(position)?;
        let features = self.preprocessor.transform(records, position)?;
        model.predict_value(&features)
    }

    /// Score every record whose group has a trained model. Groups without
    /// one are skipped with a warning.
    pub fn score(&self, records: &[AthleteRecord]) -> Result<ScoringReport> {
        let (groups, excluded) = self.partition(records);

        let outcomes: Vec<(String, Result<Vec<ScoredAthlete>>)> = groups
            .into_par_iter()
            .map(|(group, rows)| {
                let result = self.score_group(&group, &rows);
                (group, result)
            })
            .collect();

        let mut report = ScoringReport {
            excluded,
            ..ScoringReport::default()
        };
        for (group, result) in outcomes {
            match result {
                Ok(scored) => report.groups.push((group, scored)),
                Err(err @ (EngineError::ModelNotTrained(_) | EngineError::NotFitted(_))) => {
                    warn!("Not scoring {}: {}", group, err);
                    report.skipped.push(SkippedGroup { group, reason: err });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    fn score_group(&self, group: &str, rows: &[&AthleteRecord]) -> Result<Vec<ScoredAthlete>> {
        let model = self.model_for(group)?;
        let features = self.preprocessor.pipeline(group)?.transform(rows);
        let scores = model.predict_value(&features)?;
        Ok(rows
            .iter()
            .zip(scores)
            .map(|(record, value_score)| ScoredAthlete {
                name: record.name.clone(),
                position: record.position.clone(),
                school: record.school.clone(),
                value_score,
            })
            .collect())
    }

    /// Score and rank `records` across every trained group, optionally
    /// keeping only one position. Filtered entries keep their global rank.
    pub fn rank(&self, records: &[AthleteRecord], position_filter: Option<&str>) -> Result<RankingReport> {
        let scoring = self.score(records)?;
        let per_group: Vec<Vec<ScoredAthlete>> =
            scoring.groups.into_iter().map(|(_, athletes)| athletes).collect();
        let mut entries = ranking::rank(&per_group);
        if let Some(position) = position_filter {
            entries = ranking::filter_position(&entries, position);
        }
        Ok(RankingReport {
            entries,
            skipped: scoring.skipped,
            excluded: scoring.excluded,
        })
    }

    // ---- Evaluation ----

    /// Compare predicted value scores with the value scores of the actual
    /// outcomes, per trained group. Noise is not applied. Rows without a
    /// usable outcome and groups without a model are left out.
    pub fn evaluate(&self, records: &[AthleteRecord]) -> Result<Vec<PositionEvaluation>> {
        let (groups, _) = self.partition(records);
        let proxy = self.options.model.proxy;
        let undrafted = self.options.model.undrafted_pick;

        let mut evaluations = Vec::new();
        for (group, rows) in groups {
            let Ok(model) = self.model_for(&group) else {
                continue;
            };
            let labelled: Vec<(&AthleteRecord, f64)> = rows
                .into_iter()
                .filter_map(|r| proxy.target_for(r.draft.as_ref(), undrafted).map(|t| (r, t)))
                .collect();
            let (rows, targets): (Vec<&AthleteRecord>, Vec<f64>) = labelled.into_iter().unzip();

            let features = self.preprocessor.pipeline(&group)?.transform(&rows);
            let predicted_outcomes = model.predict_outcome(&features)?;
            let predicted = model.outcome_to_value_score(&predicted_outcomes)?;
            let actual = model.outcome_to_value_score(&targets)?;
            if let Some(eval) = evaluation::evaluate(&group, &predicted, &actual)? {
                evaluations.push(eval);
            }
        }
        Ok(evaluations)
    }

    // ---- Investment ----

    /// Group-wise z-scores of investment measures, with the configured
    /// deviation.
    pub fn normalize_investment(&self, records: &[InvestmentRecord]) -> Result<Vec<InvestmentSignal>> {
        investment::normalize(records, self.options.investment)
    }
}

impl TrainedPositionModel {
    fn model_rows(&self) -> usize {
        self.model.fit.as_ref().map(|f| f.training_rows).unwrap_or(0)
    }
}

/// Fit the pipeline and model for one group on its labelled rows.
fn fit_group(
    schema: &PositionSchema,
    rows: &[&AthleteRecord],
    options: EngineOptions,
) -> Result<TrainedPositionModel> {
    let proxy = options.model.proxy;
    let labelled: Vec<(&AthleteRecord, f64)> = rows
        .iter()
        .filter_map(|r| {
            proxy
                .target_for(r.draft.as_ref(), options.model.undrafted_pick)
                .map(|t| (*r, t))
        })
        .collect();

    let required = options.model.min_training_samples.max(1);
    if labelled.len() < required {
        return Err(EngineError::InsufficientData {
            group: schema.group.clone(),
            found: labelled.len(),
            required,
        });
    }

    let (rows, targets): (Vec<&AthleteRecord>, Vec<f64>) = labelled.into_iter().unzip();
    let (pipeline, features) = FittedPipeline::fit(schema, &rows, options.preprocess)?;
    let mut model = RidgeDraftModel::new(&schema.group, options.model);
    model.train(&features, &targets)?;

    Ok(TrainedPositionModel {
        group: schema.group.clone(),
        pipeline,
        model,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
