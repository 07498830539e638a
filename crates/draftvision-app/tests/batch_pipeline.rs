// Integration tests for the draftvision batch job.
//
// These run the whole pipeline against the CSV fixtures in a scratch
// directory: config bootstrap from defaults/, import, training, ranking,
// investment normalization, SQLite write-back, and JSON export.

use std::fs;
use std::path::{Path, PathBuf};

use draftvision_app::config::load_config_in;
use draftvision_app::db::Database;
use draftvision_app::export::read_models;
use draftvision_app::import::{load_athletes, load_investments};
use draftvision_app::pipeline::run_batch;
use draftvision_core::engine::ValuationEngine;

// ===========================================================================
// Test helpers
// ===========================================================================

fn crate_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn fixture(name: &str) -> PathBuf {
    crate_root().join("tests/fixtures").join(name)
}

/// Scratch directory laid out like a working directory: `defaults/` plus the
/// fixture CSVs under `data/`, where the default pipeline.toml expects them.
fn workspace(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(dir.join("defaults")).unwrap();
    fs::create_dir_all(dir.join("data")).unwrap();
    for file in ["pipeline.toml", "registry.toml"] {
        fs::copy(crate_root().join("defaults").join(file), dir.join("defaults").join(file)).unwrap();
    }
    for file in ["training.csv", "prospects.csv", "investment.csv"] {
        fs::copy(fixture(file), dir.join("data").join(file)).unwrap();
    }
    dir
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn fixtures_import_as_expected() {
    let training = load_athletes(&fixture("training.csv")).unwrap();
    assert_eq!(training.len(), 9);
    let avery = &training[0];
    assert_eq!(avery.name, "Avery Cole");
    assert_eq!(avery.snapshots.len(), 2);
    assert_eq!(avery.latest_snapshot().unwrap().stat("height"), Some(75.0));
    assert_eq!(avery.draft.map(|d| d.pick), Some(2));

    let investments = load_investments(&fixture("investment.csv")).unwrap();
    assert_eq!(investments.len(), 7);
}

#[test]
fn batch_run_end_to_end() {
    let dir = workspace("draftvision_batch_e2e");
    let config = load_config_in(&dir).unwrap();
    assert!(dir.join("config/pipeline.toml").exists());

    let summary = run_batch(&config, &dir).unwrap();
    assert_eq!(summary.trained_groups, vec!["QB".to_string(), "WR".to_string()]);
    assert_eq!(summary.skipped_groups, vec!["RB".to_string()]);
    assert_eq!(summary.ranked, 5);
    assert_eq!(summary.excluded, 1);
    assert_eq!(summary.investment_signals, 7);
    assert_eq!(summary.evaluations.len(), 2);

    // Rankings JSON: presentation shape, sorted, sequential ranks.
    let rankings = read_json(&dir.join("output/rankings.json"));
    let rows = rankings.as_array().unwrap();
    assert_eq!(rows.len(), 5);
    let mut previous = f64::INFINITY;
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row["rank"].as_u64().unwrap() as usize, i + 1);
        let score = row["value_score"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&score));
        assert!(score <= previous);
        assert_eq!((score * 10.0).round() / 10.0, score);
        previous = score;
    }
    let qb_order: Vec<&str> = rows
        .iter()
        .filter(|r| r["position"] == "QB")
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(qb_order[0], "Jordan Moss");
    assert!(qb_order.contains(&"Pat Stone"));

    // SQLite write-back.
    let db = Database::open(&dir.join("draftvision.db").to_string_lossy()).unwrap();
    let run = db.latest_run().unwrap().unwrap();
    assert_eq!(run.id, summary.run_id);
    assert_eq!(run.excluded, 1);
    assert_eq!(db.load_rankings(run.id).unwrap().len(), 5);
    let signals = db.load_signals(run.id).unwrap();
    let bears_qb = signals
        .iter()
        .find(|s| s.0 == "Bears" && s.1 == 2023 && s.2 == "QB")
        .unwrap();
    assert_eq!(bears_qb.4, "high");
    let packers_2024 = signals.iter().find(|s| s.0 == "Packers" && s.1 == 2024).unwrap();
    assert_eq!(packers_2024.3, 0.0);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn exported_models_reproduce_scores() {
    let dir = workspace("draftvision_batch_models");
    let config = load_config_in(&dir).unwrap();
    run_batch(&config, &dir).unwrap();

    let models = read_models(&dir.join("output/models.json")).unwrap();
    let groups: Vec<&str> = models.iter().map(|m| m.group.as_str()).collect();
    assert_eq!(groups, vec!["QB", "WR"]);

    let mut reloaded = ValuationEngine::new(config.registry.clone(), config.engine);
    for model in models {
        reloaded.install(model).unwrap();
    }
    let mut retrained = ValuationEngine::new(config.registry.clone(), config.engine);
    retrained.train(&load_athletes(&fixture("training.csv")).unwrap()).unwrap();

    let prospects = load_athletes(&fixture("prospects.csv")).unwrap();
    let qbs: Vec<_> = prospects.iter().filter(|p| p.position == "QB").cloned().collect();
    assert_eq!(
        reloaded.predict_value("QB", &qbs).unwrap(),
        retrained.predict_value("QB", &qbs).unwrap()
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn position_filter_keeps_global_ranks_in_output() {
    let dir = workspace("draftvision_batch_filter");
    let pipeline = dir.join("defaults/pipeline.toml");
    let text = fs::read_to_string(&pipeline).unwrap();
    fs::write(
        &pipeline,
        text.replace("# position_filter = \"QB\"", "position_filter = \"WR\""),
    )
    .unwrap();

    let config = load_config_in(&dir).unwrap();
    let summary = run_batch(&config, &dir).unwrap();
    assert_eq!(summary.ranked, 1);

    let rankings = read_json(&dir.join("output/rankings.json"));
    let rows = rankings.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Lee Owens");
    assert!(rows[0]["rank"].as_u64().unwrap() >= 1);

    let db = Database::open(&dir.join("draftvision.db").to_string_lossy()).unwrap();
    let run = db.latest_run().unwrap().unwrap();
    assert_eq!(run.position_filter.as_deref(), Some("WR"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_input_file_fails_with_context() {
    let dir = workspace("draftvision_batch_missing");
    fs::remove_file(dir.join("data/prospects.csv")).unwrap();
    let config = load_config_in(&dir).unwrap();
    let err = run_batch(&config, &dir).unwrap_err();
    assert!(format!("{err:#}").contains("prospect"));
    let _ = fs::remove_dir_all(&dir);
}
