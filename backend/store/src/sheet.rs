use async_trait::async_trait;
use chrono::Utc;
use leadflow_core::{BatchWriteItem, LeadflowError, Result, SpreadsheetAdapter};
use rusqlite::{params, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Spreadsheet mirror kept as (row, field) cells.
pub struct SqliteSheet {
    conn: Arc<Mutex<Connection>>,
}

fn sheet_err(e: impl std::fmt::Display) -> LeadflowError {
    LeadflowError::Spreadsheet(e.to_string())
}

/// `"2:40"` → rows 2..=40; `"7"` → row 7; empty → every row.
fn parse_range(range: &str) -> Result<(u32, u32)> {
    let range = range.trim();
    if range.is_empty() {
        return Ok((0, u32::MAX));
    }
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| LeadflowError::Spreadsheet(format!("invalid row range {range:?}")))
    };
    match range.split_once(':') {
        Some((start, end)) => {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(LeadflowError::Spreadsheet(format!("invalid row range {range:?}")));
            }
            Ok((start, end))
        }
        None => {
            let row = parse(range)?;
            Ok((row, row))
        }
    }
}

impl SqliteSheet {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SpreadsheetAdapter for SqliteSheet {
    /// One `[row, field, value]` triple per cell, ordered by row then field.
    async fn read_rows(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let (start, end) = parse_range(range)?;
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT row, field, value FROM sheet_cells
                 WHERE row BETWEEN ?1 AND ?2 ORDER BY row, field",
            )
            .map_err(sheet_err)?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                Ok(vec![
                    row.get::<_, u32>(0)?.to_string(),
                    row.get(1)?,
                    row.get(2)?,
                ])
            })
            .map_err(sheet_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sheet_err)?;
        Ok(rows)
    }

    async fn write_cells(&self, chunk: &[BatchWriteItem]) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(sheet_err)?;
        let now = Utc::now().to_rfc3339();
        for item in chunk {
            tx.execute(
                "INSERT INTO sheet_cells (row, field, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(row, field) DO UPDATE SET value = ?3, updated_at = ?4",
                params![item.row, item.field, item.value, now],
            )
            .map_err(sheet_err)?;
        }
        tx.commit().map_err(sheet_err)?;
        Ok(chunk.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[test]
    fn ranges() {
        assert_eq!(parse_range("2:40").unwrap(), (2, 40));
        assert_eq!(parse_range("7").unwrap(), (7, 7));
        assert_eq!(parse_range("").unwrap(), (0, u32::MAX));
        assert!(parse_range("9:3").is_err());
        assert!(parse_range("A1:C4").is_err());
    }

    #[tokio::test]
    async fn writes_overwrite_cells() {
        let sheet = Database::in_memory().unwrap().sheet();
        let written = sheet
            .write_cells(&[
                BatchWriteItem::new(2, "Last Contacted", "2026-10-16"),
                BatchWriteItem::new(3, "Last Contacted", "2026-10-16"),
            ])
            .await
            .unwrap();
        assert_eq!(written, 2);
        sheet
            .write_cells(&[BatchWriteItem::new(2, "Last Contacted", "2026-10-19")])
            .await
            .unwrap();

        let rows = sheet.read_rows("2").await.unwrap();
        assert_eq!(rows, vec![vec!["2".to_string(), "Last Contacted".into(), "2026-10-19".into()]]);
        assert_eq!(sheet.read_rows("").await.unwrap().len(), 2);
    }
}
