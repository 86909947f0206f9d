//! Dispatcher: the single path every delivery takes.
//!
//! A task is either sent now (window open, or not schedulable) or parked on
//! the primary queue. Sends go through the shared [`RetryExecutor`]; the
//! outcome is folded back into the queue, the metrics and the lead store.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use leadflow_core::{DeliveryGateway, DeliveryTask, Direction, LeadStore, NewConversation};
use leadflow_logging::{DeliveryEvent, DeliveryEventLogger};
use leadflow_scheduler::{RetryExecutor, RetryOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::batch::BatchWriteBuffer;
use crate::business_hours::BusinessHoursGate;
use crate::queue::{Admission, DeliveryQueue, FailureDisposition};
use crate::status::DeliveryMetrics;

/// Ledger job name for gateway sends.
pub const JOB_DELIVERY: &str = "delivery";
/// Ledger job name for lead-store write-back.
pub const JOB_STORE_WRITE: &str = "store_write";

pub const LAST_CONTACTED_FIELD: &str = "Last Contacted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Parked on the primary queue for the next business-hours window.
    Queued,
    Sent { delivery_id: String },
    Failed { error: String, requeued: bool },
    /// The idempotency key is already queued, in flight, or sent.
    Duplicate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub taken: usize,
    pub sent: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Put back because the lead's window had closed.
    pub deferred: usize,
    pub chunks: usize,
}

impl DrainReport {
    fn tally(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent { .. } => self.sent += 1,
            DispatchOutcome::Failed { requeued: true, .. } => self.requeued += 1,
            DispatchOutcome::Failed { requeued: false, .. } => self.failed += 1,
            DispatchOutcome::Queued | DispatchOutcome::Duplicate => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Tasks per primary-drain chunk.
    pub batch_size: usize,
    /// Pause between primary-drain chunks.
    pub batch_delay: Duration,
}

pub struct Dispatcher {
    queue: Arc<DeliveryQueue>,
    gateway: Arc<dyn DeliveryGateway>,
    executor: RetryExecutor,
    gate: Arc<BusinessHoursGate>,
    metrics: Arc<DeliveryMetrics>,
    store: Arc<dyn LeadStore>,
    batch: Option<Arc<BatchWriteBuffer>>,
    settings: DispatcherSettings,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<DeliveryQueue>,
        gateway: Arc<dyn DeliveryGateway>,
        executor: RetryExecutor,
        gate: Arc<BusinessHoursGate>,
        metrics: Arc<DeliveryMetrics>,
        store: Arc<dyn LeadStore>,
        batch: Option<Arc<BatchWriteBuffer>>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            queue,
            gateway,
            executor,
            gate,
            metrics,
            store,
            batch,
            settings: DispatcherSettings {
                batch_size: settings.batch_size.max(1),
                ..settings
            },
        }
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    /// Send now or queue for later. Never drops a task.
    pub async fn dispatch(&self, task: DeliveryTask, now: DateTime<Utc>) -> DispatchOutcome {
        if task.schedulable && !self.gate.is_open_for(task.phone.as_deref(), now) {
            let (task_id, lead_id) = (task.task_id, task.lead_id.clone());
            let recipient = task.recipient.address.clone();
            return match self.queue.enqueue_primary(task).await {
                Admission::Accepted => {
                    self.metrics.record_deferred();
                    DeliveryEventLogger::log_event(task_id, &lead_id, DeliveryEvent::Queued { recipient });
                    DispatchOutcome::Queued
                }
                Admission::Duplicate(slot) => {
                    debug!(lead_id = %lead_id, ?slot, "Duplicate follow-up ignored");
                    DispatchOutcome::Duplicate
                }
            };
        }

        match self.queue.begin_immediate(task.clone()).await {
            Admission::Accepted => self.attempt(task, now).await,
            Admission::Duplicate(slot) => {
                debug!(lead_id = %task.lead_id, ?slot, "Duplicate follow-up ignored");
                DispatchOutcome::Duplicate
            }
        }
    }

    /// Send an in-flight task and settle its queue slot.
    async fn attempt(&self, task: DeliveryTask, now: DateTime<Utc>) -> DispatchOutcome {
        let outcome = self
            .executor
            .run(JOB_DELIVERY, |_| self.gateway.send(&task))
            .await;

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                self.queue.complete_success(&task, now).await;
                self.metrics.record_sent(now);
                DeliveryEventLogger::log_event(
                    task.task_id,
                    &task.lead_id,
                    DeliveryEvent::Sent {
                        gateway: self.gateway.name().to_string(),
                        receipt: value.clone(),
                        attempts,
                    },
                );
                self.write_back(&task, &value, now).await;
                DispatchOutcome::Sent { delivery_id: value }
            }
            RetryOutcome::Exhausted { error, attempts } => {
                match self.queue.complete_failure(&task, now).await {
                    FailureDisposition::Requeued { retry_count, not_before } => {
                        self.metrics.record_requeued(now);
                        DeliveryEventLogger::log_event(
                            task.task_id,
                            &task.lead_id,
                            DeliveryEvent::Retrying {
                                retry_count,
                                error: error.to_string(),
                            },
                        );
                        debug!(lead_id = %task.lead_id, attempts, %not_before, "Delivery requeued");
                        DispatchOutcome::Failed {
                            error: error.to_string(),
                            requeued: true,
                        }
                    }
                    FailureDisposition::Dropped { retry_count } => {
                        self.metrics.record_failed(now);
                        DeliveryEventLogger::log_event(
                            task.task_id,
                            &task.lead_id,
                            DeliveryEvent::Dropped {
                                reason: format!("{retry_count} retries exhausted: {error}"),
                            },
                        );
                        DispatchOutcome::Failed {
                            error: error.to_string(),
                            requeued: false,
                        }
                    }
                }
            }
            RetryOutcome::Rejected { error, attempts } => {
                self.queue.complete_rejected(&task, now).await;
                self.metrics.record_failed(now);
                DeliveryEventLogger::log_event(
                    task.task_id,
                    &task.lead_id,
                    DeliveryEvent::Failed {
                        error: error.to_string(),
                        attempts,
                    },
                );
                DispatchOutcome::Failed {
                    error: error.to_string(),
                    requeued: false,
                }
            }
        }
    }

    /// Record a successful send in the lead store and the spreadsheet mirror.
    /// The message is already out, so failures here are logged, not returned.
    async fn write_back(&self, task: &DeliveryTask, delivery_id: &str, now: DateTime<Utc>) {
        let conversation = NewConversation {
            lead_id: task.lead_id.clone(),
            direction: Direction::Outbound,
            body: task.payload.body.clone(),
            status: "sent".to_string(),
            metadata: serde_json::json!({
                "deliveryId": delivery_id,
                "channel": task.recipient.channel,
                "idempotencyKey": task.idempotency_key,
                "retryCount": task.retry_count,
            }),
        };
        if let Err(e) = self
            .executor
            .run(JOB_STORE_WRITE, |_| self.store.insert_conversation(&conversation))
            .await
            .into_result()
        {
            warn!(lead_id = %task.lead_id, error = %e, "Could not record outbound conversation");
        }

        if let Err(e) = self
            .executor
            .run(JOB_STORE_WRITE, |_| {
                self.store.mark_followup_sent(&task.lead_id, &task.idempotency_key)
            })
            .await
            .into_result()
        {
            warn!(lead_id = %task.lead_id, error = %e, "Could not mark follow-up sent");
        }

        if let (Some(batch), Some(row)) = (&self.batch, task.sheet_row) {
            let date = self.gate.local_date(task.phone.as_deref(), now).to_string();
            if let Err(e) = batch.enqueue(row, LAST_CONTACTED_FIELD, &date).await {
                warn!(lead_id = %task.lead_id, row, error = %e, "Could not queue sheet update");
            }
        }
    }

    /// Work through the primary queue in chunks. Only tasks present when the
    /// drain starts are considered; tasks whose window has closed go back.
    /// Each chunk is evaluated at `now` plus the time the drain has spent so
    /// far, so inter-chunk delays move the window check forward.
    pub async fn drain_primary(&self, now: DateTime<Utc>) -> DrainReport {
        let mut remaining = self.queue.sizes().await.primary;
        let mut report = DrainReport::default();
        let started = tokio::time::Instant::now();

        while remaining > 0 {
            if report.chunks > 0 && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
            let chunk = self
                .queue
                .take_primary_batch(remaining.min(self.settings.batch_size))
                .await;
            if chunk.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(chunk.len());
            report.taken += chunk.len();
            report.chunks += 1;

            let chunk_now = now
                + chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
            let (open, closed): (Vec<_>, Vec<_>) = chunk
                .into_iter()
                .partition(|t| self.gate.is_open_for(t.phone.as_deref(), chunk_now));
            report.deferred += closed.len();
            self.queue.defer_to_primary(closed).await;

            for outcome in join_all(open.into_iter().map(|t| self.attempt(t, chunk_now))).await {
                report.tally(&outcome);
            }
        }

        if report.taken > 0 {
            info!(
                taken = report.taken,
                sent = report.sent,
                requeued = report.requeued,
                failed = report.failed,
                deferred = report.deferred,
                chunks = report.chunks,
                "Primary queue drained"
            );
        }
        report
    }

    /// Retry every task whose backoff has elapsed.
    pub async fn drain_retries(&self, now: DateTime<Utc>) -> DrainReport {
        let due = self.queue.take_due_retries(now).await;
        let mut report = DrainReport {
            taken: due.len(),
            chunks: usize::from(!due.is_empty()),
            ..Default::default()
        };

        let (open, closed): (Vec<_>, Vec<_>) = due
            .into_iter()
            .partition(|t| !t.schedulable || self.gate.is_open_for(t.phone.as_deref(), now));
        report.deferred = closed.len();
        self.queue.defer_to_retry(closed).await;

        for outcome in join_all(open.into_iter().map(|t| self.attempt(t, now))).await {
            report.tally(&outcome);
        }

        if report.taken > 0 {
            info!(
                taken = report.taken,
                sent = report.sent,
                requeued = report.requeued,
                failed = report.failed,
                deferred = report.deferred,
                "Retry queue drained"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::InMemoryWriteQueue;
    use crate::queue::{QueueSettings, Slot, TerminalState};
    use crate::testing::{fast_executor, task_for, MemoryLeadStore, RecordingSheet, ScriptedGateway};
    use crate::timezone::AreaCodeZones;
    use chrono::{TimeZone, Weekday};

    struct Fixture {
        dispatcher: Dispatcher,
        queue: Arc<DeliveryQueue>,
        gateway: Arc<ScriptedGateway>,
        store: Arc<MemoryLeadStore>,
        metrics: Arc<DeliveryMetrics>,
        executor: RetryExecutor,
        batch: Arc<BatchWriteBuffer>,
    }

    fn weekday_gate() -> BusinessHoursGate {
        BusinessHoursGate::new(
            9,
            17,
            vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
            AreaCodeZones::new("212", -5),
        )
    }

    fn fixture(gateway: ScriptedGateway, gate: BusinessHoursGate, max_retries: u32) -> Fixture {
        fixture_with_delay(gateway, gate, max_retries, Duration::from_millis(1))
    }

    fn fixture_with_delay(
        gateway: ScriptedGateway,
        gate: BusinessHoursGate,
        max_retries: u32,
        batch_delay: Duration,
    ) -> Fixture {
        let queue = Arc::new(DeliveryQueue::new(QueueSettings {
            max_retries: 3,
            retry_base_delay: chrono::Duration::seconds(60),
            max_primary_size: 1000,
            max_retry_size: 100,
        }));
        let gateway = Arc::new(gateway);
        let store = Arc::new(MemoryLeadStore::new(Vec::new()));
        let metrics = Arc::new(DeliveryMetrics::new());
        let executor = fast_executor(max_retries);
        let batch = Arc::new(BatchWriteBuffer::new(
            Arc::new(InMemoryWriteQueue::new()),
            Arc::new(RecordingSheet::new()),
            executor.clone(),
            500,
        ));
        let dispatcher = Dispatcher::new(
            queue.clone(),
            gateway.clone(),
            executor.clone(),
            Arc::new(gate),
            metrics.clone(),
            store.clone(),
            Some(batch.clone()),
            DispatcherSettings {
                batch_size: 2,
                batch_delay,
            },
        );
        Fixture {
            dispatcher,
            queue,
            gateway,
            store,
            metrics,
            executor,
            batch,
        }
    }

    // Monday 2026-10-19 15:00 UTC = 10:00 in New York.
    fn monday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 15, 0, 0).unwrap()
    }

    // Monday 2026-10-19 03:00 UTC = Sunday night in New York.
    fn sunday_night() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 3, 0, 0).unwrap()
    }

    fn phoned(task: DeliveryTask) -> DeliveryTask {
        task.with_phone(Some("+1 212 555 0100".into()))
    }

    #[tokio::test]
    async fn sends_inside_window_and_writes_back() {
        let f = fixture(ScriptedGateway::new(), weekday_gate(), 3);
        let task = phoned(task_for("L1")).with_sheet_row(Some(4));
        let outcome = f.dispatcher.dispatch(task.clone(), monday_morning()).await;

        assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
        assert_eq!(f.gateway.calls(), 1);
        assert_eq!(
            f.queue.slot_of(&task.idempotency_key).await,
            Some(Slot::Terminal {
                state: TerminalState::Sent,
                at: monday_morning()
            })
        );
        assert_eq!(f.store.inserted.lock().await.len(), 1);
        assert_eq!(
            f.store.marked.lock().await.as_slice(),
            &[("L1".to_string(), "L1:2026-10-19".to_string())]
        );
        assert_eq!(f.batch.pending().await.unwrap(), 1);
        assert_eq!(f.metrics.snapshot().sent, 1);
    }

    #[tokio::test]
    async fn queues_outside_window_without_sending() {
        let f = fixture(ScriptedGateway::new(), weekday_gate(), 3);
        let outcome = f.dispatcher.dispatch(phoned(task_for("L1")), sunday_night()).await;

        assert_eq!(outcome, DispatchOutcome::Queued);
        assert_eq!(f.gateway.calls(), 0);
        assert_eq!(f.queue.sizes().await.primary, 1);
        assert_eq!(f.metrics.snapshot().deferred, 1);
    }

    #[tokio::test]
    async fn immediate_task_ignores_window() {
        let f = fixture(ScriptedGateway::new(), weekday_gate(), 3);
        let outcome = f
            .dispatcher
            .dispatch(phoned(task_for("L1")).immediate(), sunday_night())
            .await;
        assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
    }

    #[tokio::test]
    async fn same_key_twice_is_duplicate() {
        let f = fixture(ScriptedGateway::new(), BusinessHoursGate::always_open(), 3);
        let now = monday_morning();
        assert!(matches!(
            f.dispatcher.dispatch(task_for("L1"), now).await,
            DispatchOutcome::Sent { .. }
        ));
        assert_eq!(f.dispatcher.dispatch(task_for("L1"), now).await, DispatchOutcome::Duplicate);
        assert_eq!(f.gateway.calls(), 1);
    }

    #[tokio::test]
    async fn fails_three_times_then_sends() {
        let f = fixture(ScriptedGateway::failing(3), BusinessHoursGate::always_open(), 5);
        let task = task_for("L1");
        let outcome = f.dispatcher.dispatch(task.clone(), monday_morning()).await;

        assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
        assert!(matches!(
            f.queue.slot_of(&task.idempotency_key).await,
            Some(Slot::Terminal {
                state: TerminalState::Sent,
                ..
            })
        ));
        let stats = f.executor.ledger().stats(JOB_DELIVERY).await;
        assert_eq!(stats.retries, 3);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.attempts, 4);
    }

    #[tokio::test]
    async fn exhausted_send_moves_to_retry_queue() {
        let f = fixture(ScriptedGateway::failing(10), BusinessHoursGate::always_open(), 2);
        let now = monday_morning();
        let outcome = f.dispatcher.dispatch(task_for("L1"), now).await;

        assert!(matches!(outcome, DispatchOutcome::Failed { requeued: true, .. }));
        assert_eq!(f.queue.sizes().await.retry, 1);
        assert_eq!(f.metrics.snapshot().requeued, 1);

        // Not due yet: base delay is 60s.
        assert_eq!(f.dispatcher.drain_retries(now).await.taken, 0);

        f.gateway.set_failures(0);
        let report = f
            .dispatcher
            .drain_retries(now + chrono::Duration::seconds(60))
            .await;
        assert_eq!((report.taken, report.sent), (1, 1));
        assert_eq!(f.queue.sizes().await, Default::default());
    }

    #[tokio::test]
    async fn retry_queue_drops_after_max_retries() {
        let f = fixture(ScriptedGateway::failing(u32::MAX), BusinessHoursGate::always_open(), 1);
        let mut now = monday_morning();
        f.dispatcher.dispatch(task_for("L1"), now).await;
        for _ in 0..4 {
            now += chrono::Duration::hours(1);
            f.dispatcher.drain_retries(now).await;
        }
        let sizes = f.queue.sizes().await;
        assert_eq!((sizes.retry, sizes.in_flight), (0, 0));
        assert!(matches!(
            f.queue.slot_of("L1:2026-10-19").await,
            Some(Slot::Terminal {
                state: TerminalState::Failed,
                ..
            })
        ));
        assert_eq!(f.metrics.snapshot().failed, 1);
        assert_eq!(f.gateway.calls(), 3);
    }

    #[tokio::test]
    async fn rejected_send_is_terminal() {
        let f = fixture(ScriptedGateway::rejecting(), BusinessHoursGate::always_open(), 5);
        let outcome = f.dispatcher.dispatch(task_for("L1"), monday_morning()).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { requeued: false, .. }));
        assert_eq!(f.gateway.calls(), 1);
        assert_eq!(f.queue.sizes().await.retry, 0);
    }

    #[tokio::test]
    async fn primary_drain_sends_in_chunks() {
        let f = fixture(ScriptedGateway::new(), weekday_gate(), 3);
        for i in 0..5 {
            f.dispatcher
                .dispatch(phoned(task_for(&format!("L{i}"))), sunday_night())
                .await;
        }
        assert_eq!(f.queue.sizes().await.primary, 5);

        let report = f.dispatcher.drain_primary(monday_morning()).await;
        assert_eq!(report.taken, 5);
        assert_eq!(report.sent, 5);
        assert_eq!(report.chunks, 3);
        assert_eq!(f.gateway.delivered_count().await, 5);
    }

    #[tokio::test]
    async fn primary_drain_outside_window_puts_tasks_back() {
        let f = fixture(ScriptedGateway::new(), weekday_gate(), 3);
        for i in 0..3 {
            f.dispatcher
                .dispatch(phoned(task_for(&format!("L{i}"))), sunday_night())
                .await;
        }
        let report = f.dispatcher.drain_primary(sunday_night()).await;
        assert_eq!((report.taken, report.deferred, report.sent), (3, 3, 0));
        assert_eq!(f.queue.sizes().await.primary, 3);
        assert_eq!(f.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn primary_drain_rechecks_window_per_chunk() {
        let f = fixture_with_delay(
            ScriptedGateway::new(),
            weekday_gate(),
            3,
            Duration::from_millis(200),
        );
        for i in 0..4 {
            f.dispatcher
                .dispatch(phoned(task_for(&format!("L{i}"))), sunday_night())
                .await;
        }
        // 16:59:59.900 in New York; the window closes before the second chunk.
        let closing = Utc.with_ymd_and_hms(2026, 10, 19, 22, 0, 0).unwrap()
            - chrono::Duration::milliseconds(100);

        let report = f.dispatcher.drain_primary(closing).await;
        assert_eq!((report.taken, report.sent, report.deferred), (4, 2, 2));
        assert_eq!(f.queue.sizes().await.primary, 2);
    }
}
