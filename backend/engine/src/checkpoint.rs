//! Persisted checkpoints of the delivery queues.
//!
//! One row holds the latest snapshot; saving replaces it. Restoring on start
//! gives best-effort durability across restarts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::queue::QueueSnapshot;

pub struct QueueCheckpointStore {
    conn: rusqlite::Connection,
}

impl QueueCheckpointStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path).context("open checkpoint store")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS queue_checkpoint (
                id        INTEGER PRIMARY KEY CHECK (id = 1),
                saved_at  INTEGER NOT NULL,
                tasks     INTEGER NOT NULL,
                snapshot  TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn save(&self, snapshot: &QueueSnapshot, saved_at: DateTime<Utc>) -> Result<()> {
        let json = serde_json::to_string(snapshot).context("serialize queue snapshot")?;
        self.conn.execute(
            "INSERT INTO queue_checkpoint (id, saved_at, tasks, snapshot) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET saved_at = ?1, tasks = ?2, snapshot = ?3",
            rusqlite::params![saved_at.timestamp(), snapshot.len() as i64, json],
        )?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<QueueSnapshot>> {
        let mut stmt = self
            .conn
            .prepare("SELECT snapshot FROM queue_checkpoint WHERE id = 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => {
                let json: String = row.get(0)?;
                let snapshot = serde_json::from_str(&json).context("parse queue snapshot")?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM queue_checkpoint", [])?;
        Ok(())
    }
}
