//! Batched spreadsheet write-back.
//!
//! Cell updates accumulate in a durable FIFO ([`WriteQueue`]) and are
//! flushed in fixed-size chunks, each chunk retried independently.
//!
//! Known gap: items are dequeued before their chunk is confirmed. A chunk
//! that exhausts its retries, or a crash mid-flush, loses those updates; the
//! loss is reported in [`FlushReport`] and logged, never silent.

use async_trait::async_trait;
use leadflow_core::{BatchWriteItem, Result, SpreadsheetAdapter, WriteQueue};
use leadflow_scheduler::{RetryExecutor, RetryOutcome};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

pub const JOB_ENQUEUE: &str = "batch_enqueue";
pub const JOB_FLUSH: &str = "batch_flush";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReport {
    pub index: usize,
    pub size: usize,
    pub written: usize,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub dequeued: usize,
    pub written: usize,
    /// Dequeued items whose chunk failed after every retry.
    pub lost: usize,
    pub chunks: Vec<ChunkReport>,
    /// Set when dequeuing stopped early; whatever was drained is still written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dequeue_error: Option<String>,
}

pub struct BatchWriteBuffer {
    queue: Arc<dyn WriteQueue>,
    sheet: Arc<dyn SpreadsheetAdapter>,
    executor: RetryExecutor,
    chunk_size: usize,
}

impl BatchWriteBuffer {
    pub fn new(
        queue: Arc<dyn WriteQueue>,
        sheet: Arc<dyn SpreadsheetAdapter>,
        executor: RetryExecutor,
        chunk_size: usize,
    ) -> Self {
        Self {
            queue,
            sheet,
            executor,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Append one cell update. The push is itself a store call and is retried.
    pub async fn enqueue(&self, row: u32, field: &str, value: &str) -> Result<()> {
        let item = BatchWriteItem::new(row, field, value);
        self.executor
            .run(JOB_ENQUEUE, |_| self.queue.push(&item))
            .await
            .into_result()
    }

    pub async fn pending(&self) -> Result<usize> {
        self.queue.len().await
    }

    /// Dequeue everything pending and write it in chunks.
    ///
    /// A dequeue failure before anything was drained is returned as an error.
    /// A later one stops dequeuing; the drained items are still written and
    /// the failure is carried in [`FlushReport::dequeue_error`].
    pub async fn flush(&self) -> Result<FlushReport> {
        let mut items = Vec::new();
        let mut dequeue_error = None;
        loop {
            match self.queue.pop_batch(self.chunk_size).await {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => items.extend(batch),
                Err(e) if items.is_empty() => return Err(e),
                Err(e) => {
                    error!(
                        drained = items.len(),
                        error = %e,
                        "Write queue failed mid-flush; writing what was drained"
                    );
                    dequeue_error = Some(e.to_string());
                    break;
                }
            }
        }

        let mut report = FlushReport {
            dequeued: items.len(),
            dequeue_error,
            ..Default::default()
        };
        if items.is_empty() {
            return Ok(report);
        }

        for (index, chunk) in items.chunks(self.chunk_size).enumerate() {
            let outcome = self
                .executor
                .run(JOB_FLUSH, |_| self.sheet.write_cells(chunk))
                .await;
            let attempts = outcome.attempts();
            let chunk_report = match outcome {
                RetryOutcome::Succeeded { .. } => ChunkReport {
                    index,
                    size: chunk.len(),
                    written: chunk.len(),
                    attempts,
                    error: None,
                },
                RetryOutcome::Exhausted { error, .. } | RetryOutcome::Rejected { error, .. } => {
                    error!(
                        chunk = index,
                        items = chunk.len(),
                        attempts,
                        error = %error,
                        "Batch chunk lost after retries"
                    );
                    ChunkReport {
                        index,
                        size: chunk.len(),
                        written: 0,
                        attempts,
                        error: Some(error.to_string()),
                    }
                }
            };
            report.written += chunk_report.written;
            report.lost += chunk_report.size - chunk_report.written;
            report.chunks.push(chunk_report);
        }

        info!(
            dequeued = report.dequeued,
            written = report.written,
            lost = report.lost,
            chunks = report.chunks.len(),
            "Batch flush finished"
        );
        Ok(report)
    }
}

/// Process-local write queue. Not durable; for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryWriteQueue {
    items: Mutex<VecDeque<BatchWriteItem>>,
}

impl InMemoryWriteQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WriteQueue for InMemoryWriteQueue {
    async fn push(&self, item: &BatchWriteItem) -> Result<()> {
        self.items.lock().await.push_back(item.clone());
        Ok(())
    }

    async fn pop_batch(&self, max: usize) -> Result<Vec<BatchWriteItem>> {
        let mut items = self.items.lock().await;
        let n = max.min(items.len());
        Ok(items.drain(..n).collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.items.lock().await.len())
    }
}
