use async_trait::async_trait;
use leadflow_core::{BatchWriteItem, Result, WriteQueue};
use rusqlite::{params, Connection, TransactionBehavior};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::store_err;

/// Durable FIFO of pending sheet updates.
///
/// `pop_batch` selects and deletes inside one immediate transaction, so an
/// item is handed out once even with several processes on the same file.
pub struct SqliteWriteQueue {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWriteQueue {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl WriteQueue for SqliteWriteQueue {
    async fn push(&self, item: &BatchWriteItem) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO write_queue (row, field, value) VALUES (?1, ?2, ?3)",
                params![item.row, item.field, item.value],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn pop_batch(&self, max: usize) -> Result<Vec<BatchWriteItem>> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)?;

        let popped = {
            let mut stmt = tx
                .prepare("SELECT seq, row, field, value FROM write_queue ORDER BY seq LIMIT ?1")
                .map_err(store_err)?;
            let rows = stmt
                .query_map(params![max as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        BatchWriteItem {
                            row: row.get(1)?,
                            field: row.get(2)?,
                            value: row.get(3)?,
                        },
                    ))
                })
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?;
            rows
        };

        if let Some((last_seq, _)) = popped.last() {
            tx.execute("DELETE FROM write_queue WHERE seq <= ?1", params![last_seq])
                .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;
        Ok(popped.into_iter().map(|(_, item)| item).collect())
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .await
            .query_row("SELECT COUNT(*) FROM write_queue", [], |row| row.get(0))
            .map_err(store_err)?;
        Ok(count as usize)
    }
}
