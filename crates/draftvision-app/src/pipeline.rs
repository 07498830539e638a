// The batch job: import, train, evaluate, rank, normalize, persist.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use draftvision_core::engine::ValuationEngine;
use draftvision_core::evaluation::PositionEvaluation;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::{export, import};

/// What one batch run did.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub run_id: i64,
    pub run_label: String,
    pub trained_groups: Vec<String>,
    pub skipped_groups: Vec<String>,
    pub evaluations: Vec<PositionEvaluation>,
    pub ranked: usize,
    /// Prospects whose position matched no registered group.
    pub excluded: usize,
    pub investment_signals: usize,
}

/// Resolve a configured path against `base_dir` unless it is absolute.
fn resolve(base_dir: &Path, configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Run the full batch with paths relative to `base_dir`.
pub fn run_batch(config: &Config, base_dir: &Path) -> Result<BatchSummary> {
    // 1. Import
    let training = import::load_athletes(&resolve(base_dir, &config.data_paths.training))
        .context("failed to import training records")?;
    let prospects = import::load_athletes(&resolve(base_dir, &config.data_paths.prospects))
        .context("failed to import prospect records")?;
    let investments = import::load_investments(&resolve(base_dir, &config.data_paths.investment))
        .context("failed to import investment records")?;
    info!(
        "Loaded {} training athletes, {} prospects, {} investment rows",
        training.len(),
        prospects.len(),
        investments.len()
    );

    // 2. Train
    let mut engine = ValuationEngine::new(config.registry.clone(), config.engine);
    let training_report = engine.train(&training).context("training failed")?;
    if training_report.trained.is_empty() {
        warn!("No position group had enough labelled rows to train");
    }

    // 3. Evaluate on the training cohort
    let evaluations = engine.evaluate(&training).context("evaluation failed")?;
    for eval in &evaluations {
        info!(
            "{}: n={} MAE={:.2} RMSE={:.2} R2={:.3} mean={:.1} p25/p50/p75={:.1}/{:.1}/{:.1}",
            eval.group,
            eval.samples,
            eval.mae,
            eval.rmse,
            eval.r_squared,
            eval.predicted.mean,
            eval.predicted.p25,
            eval.predicted.p50,
            eval.predicted.p75
        );
    }

    // 4. Score and rank prospects
    let filter = config.output.position_filter.as_deref();
    let ranking = engine.rank(&prospects, filter).context("ranking failed")?;
    info!(
        "Ranked {} prospects ({} excluded: unknown position)",
        ranking.entries.len(),
        ranking.excluded
    );

    // 5. Investment signals
    let signals = engine
        .normalize_investment(&investments)
        .context("investment normalization failed")?;

    // 6. Persist
    let db_path = resolve(base_dir, &config.output.database);
    let db = Database::open(&db_path.to_string_lossy()).context("failed to open database")?;
    let run_label = Database::generate_run_label();
    let run_id = db
        .save_run(&run_label, filter, ranking.excluded, &ranking.entries, &signals)
        .context("failed to store run")?;

    export::write_rankings(&resolve(base_dir, &config.output.rankings_json), &ranking.entries)?;
    export::write_models(
        &resolve(base_dir, &config.output.models_json),
        &engine.trained_models(),
    )?;

    let mut skipped_groups: Vec<String> = training_report
        .skipped
        .into_iter()
        .chain(ranking.skipped)
        .map(|s| s.group)
        .collect();
    skipped_groups.sort();
    skipped_groups.dedup();

    let summary = BatchSummary {
        run_id,
        run_label,
        trained_groups: training_report.trained.into_iter().map(|t| t.group).collect(),
        skipped_groups,
        evaluations,
        ranked: ranking.entries.len(),
        excluded: ranking.excluded,
        investment_signals: signals.len(),
    };
    info!(
        "Run {} stored: trained {:?}, skipped {:?}, {} ranked, {} investment signals",
        summary.run_label,
        summary.trained_groups,
        summary.skipped_groups,
        summary.ranked,
        summary.investment_signals
    );
    Ok(summary)
}
