use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::leads::SqliteLeadStore;
use crate::sheet::SqliteSheet;
use crate::write_queue::SqliteWriteQueue;

/// One SQLite database shared by every adapter.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self::init(conn)?;
        info!(path = %path, "Lead database opened");
        Ok(db)
    }

    /// In-memory database (for testing and dry runs).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS leads (
                id                TEXT PRIMARY KEY,
                name              TEXT NOT NULL DEFAULT '',
                phone             TEXT,
                email             TEXT,
                last_contact_at   TEXT,
                status            TEXT NOT NULL DEFAULT 'new',
                sheet_row         INTEGER,
                metadata          TEXT NOT NULL DEFAULT '{}',
                last_followup_key TEXT,
                followup_count    INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS conversations (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                lead_id    TEXT NOT NULL,
                direction  TEXT NOT NULL,
                body       TEXT NOT NULL,
                status     TEXT NOT NULL,
                metadata   TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_lead ON conversations(lead_id, created_at);
            CREATE TABLE IF NOT EXISTS write_queue (
                seq   INTEGER PRIMARY KEY AUTOINCREMENT,
                row   INTEGER NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sheet_cells (
                row        INTEGER NOT NULL,
                field      TEXT NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (row, field)
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn lead_store(&self) -> SqliteLeadStore {
        SqliteLeadStore::new(self.conn.clone())
    }

    pub fn write_queue(&self) -> SqliteWriteQueue {
        SqliteWriteQueue::new(self.conn.clone())
    }

    pub fn sheet(&self) -> SqliteSheet {
        SqliteSheet::new(self.conn.clone())
    }
}
