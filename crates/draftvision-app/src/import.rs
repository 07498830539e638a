// CSV import of athlete season rows and investment measures.
//
// The athlete table is flat: one row per (athlete, season), with identity
// columns plus the union of every position's stat columns. Rows are folded
// into one `AthleteRecord` per (name, position, school).

use draftvision_core::investment::InvestmentRecord;
use draftvision_core::record::{AthleteRecord, DraftOutcome, StatSnapshot};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("{path} is missing required column `{column}`")]
    MissingColumn { path: String, column: String },
}

// ---------------------------------------------------------------------------
// Column layout
// ---------------------------------------------------------------------------

const NAME: &str = "name";
const POSITION: &str = "position";
const SCHOOL: &str = "school";
const YEAR: &str = "year";
const TEAM: &str = "team";
const DRAFT_ROUND: &str = "draft_round";
const DRAFT_PICK: &str = "draft_pick";

/// Text columns stored as snapshot labels rather than parsed as numbers.
const LABEL_COLUMNS: &[&str] = &["conference"];

/// Columns holding heights that may be written as feet-inches.
const HEIGHT_COLUMNS: &[&str] = &["height"];

/// Header positions, resolved once per file.
struct Layout {
    name: usize,
    position: usize,
    year: usize,
    school: Option<usize>,
    team: Option<usize>,
    draft_round: Option<usize>,
    draft_pick: Option<usize>,
    labels: Vec<(usize, String)>,
    numeric: Vec<(usize, String)>,
}

impl Layout {
    fn from_headers(headers: &csv::StringRecord, source: &str) -> Result<Self, ImportError> {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let find = |column: &str| names.iter().position(|h| h == column);
        let require = |column: &str| {
            find(column).ok_or_else(|| ImportError::MissingColumn {
                path: source.to_string(),
                column: column.to_string(),
            })
        };

        let identity = [NAME, POSITION, SCHOOL, YEAR, TEAM, DRAFT_ROUND, DRAFT_PICK];
        let mut labels = Vec::new();
        let mut numeric = Vec::new();
        for (i, header) in names.iter().enumerate() {
            if header.is_empty() || identity.contains(&header.as_str()) {
                continue;
            }
            if LABEL_COLUMNS.contains(&header.as_str()) {
                labels.push((i, header.clone()));
            } else {
                numeric.push((i, header.clone()));
            }
        }

        Ok(Self {
            name: require(NAME)?,
            position: require(POSITION)?,
            year: require(YEAR)?,
            school: find(SCHOOL),
            team: find(TEAM),
            draft_round: find(DRAFT_ROUND),
            draft_pick: find(DRAFT_PICK),
            labels,
            numeric,
        })
    }
}

// ---------------------------------------------------------------------------
// Cell parsing
// ---------------------------------------------------------------------------

fn cell<'r>(row: &'r csv::StringRecord, index: usize) -> Option<&'r str> {
    row.get(index).map(str::trim).filter(|v| !v.is_empty())
}

fn optional_cell<'r>(row: &'r csv::StringRecord, index: Option<usize>) -> Option<&'r str> {
    index.and_then(|i| cell(row, i))
}

/// Parse `6-2` or `6'2"` style heights into inches.
pub fn parse_feet_inches(text: &str) -> Option<f64> {
    let cleaned = text.trim().trim_end_matches('"');
    let (feet, inches) = cleaned.split_once(['-', '\''])?;
    let feet: f64 = feet.trim().parse().ok()?;
    let inches: f64 = inches.trim().parse().ok()?;
    Some(feet * 12.0 + inches)
}

fn parse_stat(column: &str, text: &str) -> Option<f64> {
    if let Ok(value) = text.parse::<f64>() {
        return Some(value);
    }
    if HEIGHT_COLUMNS.contains(&column) {
        return parse_feet_inches(text);
    }
    None
}

fn parse_draft(row: &csv::StringRecord, layout: &Layout, name: &str) -> Option<DraftOutcome> {
    let round = optional_cell(row, layout.draft_round);
    let pick = optional_cell(row, layout.draft_pick);
    match (round, pick) {
        (None, None) => None,
        (Some(round), Some(pick)) => match (round.parse::<u32>(), pick.parse::<u32>()) {
            (Ok(round), Ok(pick)) if round > 0 && pick > 0 => Some(DraftOutcome { round, pick }),
            _ => {
                warn!("ignoring draft outcome for '{}': unparsable round/pick", name);
                None
            }
        },
        _ => {
            warn!("ignoring draft outcome for '{}': round and pick must both be set", name);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Reader-based loaders (enable testing without temp files)
// ---------------------------------------------------------------------------

/// Read the flat athlete table. `source` names the input in errors and logs.
pub fn athletes_from_reader<R: Read>(rdr: R, source: &str) -> Result<Vec<AthleteRecord>, ImportError> {
    let csv_err = |e| ImportError::Csv {
        path: source.to_string(),
        source: e,
    };
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
    let headers = reader.headers().map_err(csv_err)?.clone();
    let layout = Layout::from_headers(&headers, source)?;

    let mut records: Vec<AthleteRecord> = Vec::new();
    let mut index: HashMap<(String, String, Option<String>), usize> = HashMap::new();
    let mut skipped = 0usize;

    for (line, result) in reader.records().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!("skipping malformed row in {}: {}", source, e);
                skipped += 1;
                continue;
            }
        };

        let (Some(name), Some(position)) = (cell(&row, layout.name), cell(&row, layout.position)) else {
            warn!("skipping row {} in {}: missing name or position", line + 2, source);
            skipped += 1;
            continue;
        };
        let Some(year) = cell(&row, layout.year).and_then(|y| y.parse::<i32>().ok()) else {
            warn!("skipping row {} in {} ('{}'): missing or invalid year", line + 2, source, name);
            skipped += 1;
            continue;
        };
        let school = optional_cell(&row, layout.school).map(str::to_string);

        let mut snapshot = StatSnapshot::new(year);
        snapshot.team = optional_cell(&row, layout.team).map(str::to_string);
        for (i, column) in &layout.labels {
            if let Some(value) = cell(&row, *i) {
                snapshot.labels.insert(column.clone(), value.to_string());
            }
        }
        for (i, column) in &layout.numeric {
            let Some(text) = cell(&row, *i) else {
                continue;
            };
            match parse_stat(column, text) {
                Some(value) => {
                    snapshot.numeric.insert(column.clone(), value);
                }
                None => warn!(
                    "treating {} = '{}' for '{}' ({}) as missing: not a number",
                    column, text, name, year
                ),
            }
        }

        let draft = parse_draft(&row, &layout, name);
        let key = (name.to_string(), position.to_string(), school.clone());
        let slot = *index.entry(key).or_insert_with(|| {
            records.push(AthleteRecord::new(name, position, school.as_deref()));
            records.len() - 1
        });
        let record = &mut records[slot];
        record.snapshots.push(snapshot);
        if record.draft.is_none() {
            record.draft = draft;
        }
    }

    info!(
        "Imported {} athletes from {} ({} rows skipped)",
        records.len(),
        source,
        skipped
    );
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct RawInvestment {
    #[serde(alias = "team")]
    entity: String,
    #[serde(alias = "year")]
    period: i32,
    #[serde(alias = "position")]
    role: String,
    #[serde(alias = "investment")]
    raw_measure: f64,
}

/// Read investment rows. Malformed rows are skipped with a warning.
pub fn investments_from_reader<R: Read>(rdr: R, source: &str) -> Result<Vec<InvestmentRecord>, ImportError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut records = Vec::new();
    for result in reader.deserialize::<RawInvestment>() {
        match result {
            Ok(raw) => {
                if raw.entity.is_empty() || raw.role.is_empty() {
                    warn!("skipping investment row in {}: blank entity or role", source);
                    continue;
                }
                records.push(InvestmentRecord::new(
                    &raw.entity,
                    raw.period,
                    &raw.role,
                    raw.raw_measure,
                ));
            }
            Err(e) => {
                warn!("skipping malformed investment row in {}: {}", source, e);
            }
        }
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Public path-based loaders
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<std::fs::File, ImportError> {
    std::fs::File::open(path).map_err(|e| ImportError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Load the flat athlete table from a CSV file.
pub fn load_athletes(path: &Path) -> Result<Vec<AthleteRecord>, ImportError> {
    athletes_from_reader(open(path)?, &path.display().to_string())
}

/// Load investment measures from a CSV file.
pub fn load_investments(path: &Path) -> Result<Vec<InvestmentRecord>, ImportError> {
    investments_from_reader(open(path)?, &path.display().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn athletes(csv: &str) -> Vec<AthleteRecord> {
        athletes_from_reader(csv.as_bytes(), "test.csv").unwrap()
    }

    #[test]
    fn groups_seasons_into_records_in_first_seen_order() {
        let csv = "\
name,position,school,year,pass_yards,receptions,draft_round,draft_pick
Alpha,QB,State,2022,3000,,,
Bravo,WR,Tech,2023,,70,2,45
Alpha,QB,State,2023,3900,,1,3
";
        let records = athletes(csv);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Alpha");
        assert_eq!(records[0].snapshots.len(), 2);
        assert_eq!(records[0].latest_snapshot().unwrap().stat("pass_yards"), Some(3900.0));
        assert_eq!(records[0].draft, Some(DraftOutcome { round: 1, pick: 3 }));
        assert_eq!(records[1].school.as_deref(), Some("Tech"));
        assert_eq!(records[1].draft, Some(DraftOutcome { round: 2, pick: 45 }));
    }

    #[test]
    fn empty_cells_are_absent_not_zero() {
        let records = athletes("name,position,school,year,pass_yards,sacks\nA,QB,S,2023,,\n");
        let snap = &records[0].snapshots[0];
        assert!(snap.numeric.is_empty());
        assert_eq!(snap.stat("pass_yards"), None);
    }

    #[test]
    fn unparsable_numbers_are_missing() {
        let records = athletes("name,position,school,year,pass_yards,forty\nA,QB,S,2023,lots,4.61\n");
        let snap = &records[0].snapshots[0];
        assert_eq!(snap.stat("pass_yards"), None);
        assert_eq!(snap.stat("forty"), Some(4.61));
    }

    #[test]
    fn heights_in_feet_inches_become_inches() {
        let records = athletes("name,position,school,year,height\nA,WR,S,2023,6-2\nB,WR,S,2023,73.5\n");
        assert_eq!(records[0].snapshots[0].stat("height"), Some(74.0));
        assert_eq!(records[1].snapshots[0].stat("height"), Some(73.5));
        assert_eq!(parse_feet_inches("5'11\""), Some(71.0));
        assert_eq!(parse_feet_inches("tall"), None);
    }

    #[test]
    fn rows_without_identity_are_skipped() {
        let csv = "\
name,position,school,year,pass_yards
,QB,S,2023,100
A,,S,2023,100
B,QB,S,,100
C,QB,S,twenty,100
D,QB,S,2023,100
";
        let records = athletes(csv);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "D");
    }

    #[test]
    fn conference_and_team_become_labels() {
        let records = athletes("name,position,school,year,team,conference\nA,LB,S,2023,Tigers,SEC\n");
        assert_eq!(records[0].label("conference"), Some("SEC"));
        assert_eq!(records[0].label("team"), Some("Tigers"));
        assert!(records[0].snapshots[0].numeric.is_empty());
    }

    #[test]
    fn headers_are_case_insensitive_and_draft_needs_both_parts() {
        let records = athletes("Name,Position,School,Year,Draft_Pick\nA,QB,S,2023,12\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].draft, None);
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let err = athletes_from_reader("name,school,year\nA,S,2023\n".as_bytes(), "x.csv").unwrap_err();
        match err {
            ImportError::MissingColumn { column, .. } => assert_eq!(column, "position"),
            other => panic!("expected MissingColumn, got: {other}"),
        }
    }

    #[test]
    fn same_name_different_school_are_different_athletes() {
        let records = athletes("name,position,school,year\nA,QB,North,2023\nA,QB,South,2023\n");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn investment_rows_accept_aliases() {
        let csv = "team,year,position,investment\nBears, 2023 ,QB,12.5\nLions,2023,QB,oops\n";
        let rows = investments_from_reader(csv.as_bytes(), "inv.csv").unwrap();
        assert_eq!(rows, vec![InvestmentRecord::new("Bears", 2023, "QB", 12.5)]);
    }

    #[test]
    fn investment_rows_with_canonical_headers() {
        let csv = "entity,period,role,raw_measure\nA,2021,OL,1\nB,2021,OL,3\n";
        let rows = investments_from_reader(csv.as_bytes(), "inv.csv").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].raw_measure, 3.0);
    }
}
