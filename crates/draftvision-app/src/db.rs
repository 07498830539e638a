// SQLite persistence for ranking runs and investment signals.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use draftvision_core::investment::InvestmentSignal;
use draftvision_core::ranking::RankingEntry;
use rusqlite::{params, Connection};

/// SQLite-backed store for scored output. Every batch run gets a row in
/// `ranking_runs`; rankings and investment signals hang off it.
pub struct Database {
    conn: Mutex<Connection>,
}

/// Summary of one stored run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: i64,
    pub run_label: String,
    pub created_at: String,
    pub position_filter: Option<String>,
    pub excluded: usize,
}

/// Connection settings and tables. Runs are keyed by `id`; labels are for
/// people and may repeat.
const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;

    CREATE TABLE IF NOT EXISTS ranking_runs (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        run_label       TEXT NOT NULL,
        created_at      TEXT NOT NULL,
        position_filter TEXT,
        excluded        INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS rankings (
        run_id      INTEGER NOT NULL REFERENCES ranking_runs(id),
        rank        INTEGER NOT NULL,
        name        TEXT NOT NULL,
        position    TEXT NOT NULL,
        school      TEXT,
        value_score REAL NOT NULL,
        PRIMARY KEY (run_id, rank)
    );

    CREATE TABLE IF NOT EXISTS investment_signals (
        run_id      INTEGER NOT NULL REFERENCES ranking_runs(id),
        entity      TEXT NOT NULL,
        period      INTEGER NOT NULL,
        role        TEXT NOT NULL,
        raw_measure REAL NOT NULL,
        z_score     REAL NOT NULL,
        tier        TEXT NOT NULL,
        PRIMARY KEY (run_id, entity, period, role)
    );
";

impl Database {
    /// Open or create the run store at `path` (`":memory:"` in tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("cannot open run store {path}"))?;
        conn.execute_batch(SCHEMA)
            .with_context(|| format!("cannot prepare run store {path}"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Human-readable label from the current UTC time, e.g.
    /// `run_20260228_143022_123456`.
    pub fn generate_run_label() -> String {
        chrono::Utc::now().format("run_%Y%m%d_%H%M%S_%6f").to_string()
    }

    /// Store one run's rankings and investment signals in a single
    /// transaction. Returns the new run id.
    pub fn save_run(
        &self,
        run_label: &str,
        position_filter: Option<&str>,
        excluded: usize,
        rankings: &[RankingEntry],
        signals: &[InvestmentSignal],
    ) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("failed to begin run transaction")?;

        let created_at = chrono::Utc::now().to_rfc3339();
        let run_id: i64 = tx
            .query_row(
                "INSERT INTO ranking_runs (run_label, created_at, position_filter, excluded)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING id",
                params![run_label, created_at, position_filter, excluded as i64],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to create run {run_label}"))?;

        for entry in rankings {
            tx.execute(
                "INSERT INTO rankings (run_id, rank, name, position, school, value_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run_id,
                    entry.rank as i64,
                    entry.name,
                    entry.position,
                    entry.school,
                    entry.value_score,
                ],
            )
            .context("failed to insert ranking entry")?;
        }

        for signal in signals {
            tx.execute(
                "INSERT INTO investment_signals
                    (run_id, entity, period, role, raw_measure, z_score, tier)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    run_id,
                    signal.entity,
                    signal.period,
                    signal.role,
                    signal.raw_measure,
                    signal.z_score,
                    signal.tier.as_str(),
                ],
            )
            .context("failed to insert investment signal")?;
        }

        tx.commit().context("failed to commit run")?;
        Ok(run_id)
    }

    /// The most recently stored run, if any.
    pub fn latest_run(&self) -> Result<Option<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, run_label, created_at, position_filter, excluded
                 FROM ranking_runs ORDER BY id DESC LIMIT 1",
            )
            .context("failed to prepare latest_run query")?;
        let mut rows = stmt
            .query_map([], |row| {
                let excluded: i64 = row.get(4)?;
                Ok(RunRecord {
                    id: row.get(0)?,
                    run_label: row.get(1)?,
                    created_at: row.get(2)?,
                    position_filter: row.get(3)?,
                    excluded: excluded.max(0) as usize,
                })
            })
            .context("failed to query latest run")?;
        let latest = rows
            .next()
            .transpose()
            .context("failed to read latest run")?;
        Ok(latest)
    }

    /// Rankings of a run, in rank order.
    pub fn load_rankings(&self, run_id: i64) -> Result<Vec<RankingEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT rank, name, position, school, value_score
                 FROM rankings WHERE run_id = ?1 ORDER BY rank",
            )
            .context("failed to prepare load_rankings query")?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                let rank: i64 = row.get(0)?;
                Ok(RankingEntry {
                    rank: rank.max(0) as usize,
                    name: row.get(1)?,
                    position: row.get(2)?,
                    school: row.get(3)?,
                    value_score: row.get(4)?,
                })
            })
            .context("failed to query rankings")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read rankings")?;
        Ok(entries)
    }

    /// Investment signals of a run as (entity, period, role, z_score, tier).
    pub fn load_signals(&self, run_id: i64) -> Result<Vec<(String, i32, String, f64, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT entity, period, role, z_score, tier
                 FROM investment_signals WHERE run_id = ?1
                 ORDER BY period, role, entity",
            )
            .context("failed to prepare load_signals query")?;
        let signals = stmt
            .query_map(params![run_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })
            .context("failed to query investment signals")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read investment signals")?;
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftvision_core::investment::InvestmentTier;

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn entry(rank: usize, name: &str, score: f64) -> RankingEntry {
        RankingEntry {
            rank,
            name: name.to_string(),
            position: "QB".to_string(),
            school: Some("State".to_string()),
            value_score: score,
        }
    }

    fn signal(entity: &str, z: f64) -> InvestmentSignal {
        InvestmentSignal {
            entity: entity.to_string(),
            period: 2023,
            role: "QB".to_string(),
            raw_measure: 10.0,
            z_score: z,
            tier: InvestmentTier::from_zscore(z),
        }
    }

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(tables.contains(&"ranking_runs".to_string()));
        assert!(tables.contains(&"rankings".to_string()));
        assert!(tables.contains(&"investment_signals".to_string()));
    }

    #[test]
    fn save_and_load_run_round_trip() {
        let db = test_db();
        let rankings = vec![entry(1, "A", 91.25), entry(2, "B", 40.0)];
        let signals = vec![signal("Bears", 1.5), signal("Lions", -0.2)];
        let run_id = db.save_run("run_test", Some("QB"), 3, &rankings, &signals).unwrap();

        assert_eq!(db.load_rankings(run_id).unwrap(), rankings);

        let run = db.latest_run().unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.run_label, "run_test");
        assert_eq!(run.position_filter.as_deref(), Some("QB"));
        assert_eq!(run.excluded, 3);
        assert!(!run.created_at.is_empty());

        let stored = db.load_signals(run_id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].0, "Bears");
        assert_eq!(stored[0].4, "high");
        assert_eq!(stored[1].4, "average");
    }

    #[test]
    fn runs_are_kept_separately() {
        let db = test_db();
        let first = db.save_run("run_a", None, 0, &[entry(1, "A", 50.0)], &[]).unwrap();
        let second = db.save_run("run_b", None, 0, &[entry(1, "B", 60.0)], &[]).unwrap();
        assert_ne!(first, second);
        assert_eq!(db.load_rankings(first).unwrap()[0].name, "A");
        assert_eq!(db.load_rankings(second).unwrap()[0].name, "B");
        assert_eq!(db.latest_run().unwrap().unwrap().run_label, "run_b");
    }

    #[test]
    fn repeated_run_label_stores_a_second_run() {
        let db = test_db();
        let first = db.save_run("run_x", None, 0, &[entry(1, "A", 50.0)], &[]).unwrap();
        let second = db.save_run("run_x", None, 0, &[entry(1, "B", 60.0)], &[]).unwrap();
        assert_ne!(first, second);
        assert_eq!(db.load_rankings(second).unwrap()[0].name, "B");
    }

    #[test]
    fn failed_run_leaves_no_partial_rows() {
        let db = test_db();
        db.save_run("run_ok", None, 0, &[entry(1, "A", 50.0)], &[]).unwrap();
        // Two entries with rank 1 violate the rankings primary key.
        let clash = [entry(1, "B", 60.0), entry(1, "C", 55.0)];
        assert!(db.save_run("run_bad", None, 0, &clash, &[]).is_err());

        let run = db.latest_run().unwrap().unwrap();
        assert_eq!(run.run_label, "run_ok");
        assert_eq!(db.load_rankings(run.id).unwrap().len(), 1);
    }

    #[test]
    fn latest_run_is_none_when_empty() {
        assert!(test_db().latest_run().unwrap().is_none());
    }

    #[test]
    fn run_label_has_expected_shape() {
        let label = Database::generate_run_label();
        assert!(label.starts_with("run_"));
        assert_eq!(label.len(), "run_20260228_143022_123456".len());
    }
}
