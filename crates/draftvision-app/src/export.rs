// JSON output: presentation-shaped rankings and trained model snapshots.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use draftvision_core::engine::TrainedPositionModel;
use draftvision_core::ranking::{presentation_rows, RankingEntry, RankingRow};
use serde::Serialize;

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, what: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).with_context(|| format!("serialize {what}"))?;
    fs::write(path, json).with_context(|| format!("write {what} to {}", path.display()))?;
    Ok(())
}

/// Write `{rank, name, position, school, value_score}` rows, scores rounded
/// to one decimal.
pub fn write_rankings(path: &Path, entries: &[RankingEntry]) -> Result<()> {
    let rows: Vec<RankingRow> = presentation_rows(entries);
    write_json(path, &rows, "rankings")
}

/// Write every trained group's pipeline and model.
pub fn write_models(path: &Path, models: &[TrainedPositionModel]) -> Result<()> {
    write_json(path, models, "trained models")
}

/// Read models written by `write_models`.
pub fn read_models(path: &Path) -> Result<Vec<TrainedPositionModel>> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse trained models in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rankings_json_uses_presentation_shape() {
        let dir = std::env::temp_dir().join("draftvision_export_rankings");
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("nested/rankings.json");
        let entries = vec![RankingEntry {
            rank: 1,
            name: "A".into(),
            position: "QB".into(),
            school: None,
            value_score: 77.777,
        }];
        write_rankings(&path, &entries).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[0]["rank"], 1);
        assert_eq!(value[0]["name"], "A");
        assert_eq!(value[0]["value_score"], 77.8);
        assert!(value[0]["school"].is_null());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_models_reports_missing_file() {
        let missing = std::env::temp_dir().join("draftvision_export_missing/models.json");
        assert!(read_models(&missing).is_err());
    }
}
