/// Durable run log for scheduled jobs.
///
/// Every time a job fires, a row is written with the outcome.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
    /// The previous run of the same job was still active.
    Skipped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Ok => "ok",
            RunStatus::Error => "error",
            RunStatus::Skipped => "skipped",
        })
    }
}

impl RunStatus {
    fn parse(s: &str) -> Self {
        match s {
            "ok" => RunStatus::Ok,
            "skipped" => RunStatus::Skipped,
            _ => RunStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub id: String,
    pub job: String,
    pub fired_at: i64,
    pub status: RunStatus,
    pub output_summary: Option<String>,
    pub error: Option<String>,
}

impl RunLogEntry {
    pub fn new(job: &str, status: RunStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job: job.to_string(),
            fired_at: chrono::Utc::now().timestamp(),
            status,
            output_summary: None,
            error: None,
        }
    }
}

pub struct RunLog {
    conn: rusqlite::Connection,
}

impl RunLog {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path).context("open run log")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS job_run_log (
                id             TEXT PRIMARY KEY,
                job            TEXT NOT NULL,
                fired_at       INTEGER NOT NULL,
                status         TEXT NOT NULL,
                output_summary TEXT,
                error          TEXT
            );
            CREATE INDEX IF NOT EXISTS job_run_log_job ON job_run_log(job);
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn record(&self, entry: &RunLogEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO job_run_log (id, job, fired_at, status, output_summary, error)
             VALUES (?1,?2,?3,?4,?5,?6)",
            rusqlite::params![
                entry.id,
                entry.job,
                entry.fired_at,
                entry.status.to_string(),
                entry.output_summary,
                entry.error,
            ],
        )?;
        Ok(())
    }

    /// Most recent runs of `job`, newest first.
    pub fn recent(&self, job: &str, limit: usize) -> Result<Vec<RunLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job, fired_at, status, output_summary, error
             FROM job_run_log WHERE job = ?1
             ORDER BY fired_at DESC, rowid DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(rusqlite::params![job, limit as i64], |row| {
                let status: String = row.get(3)?;
                Ok(RunLogEntry {
                    id: row.get(0)?,
                    job: row.get(1)?,
                    fired_at: row.get(2)?,
                    status: RunStatus::parse(&status),
                    output_summary: row.get(4)?,
                    error: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Prune entries older than `max_age_secs`.
    pub fn prune(&self, max_age_secs: i64) -> Result<usize> {
        let cutoff = chrono::Utc::now().timestamp() - max_age_secs;
        let n = self.conn.execute(
            "DELETE FROM job_run_log WHERE fired_at < ?1",
            rusqlite::params![cutoff],
        )?;
        Ok(n)
    }
}
