//! `FollowupService`: owns every engine component and exposes the
//! operations the scheduler jobs and the HTTP surface call.

use chrono::{DateTime, Duration, Utc};
use leadflow_config::LeadflowConfig;
use leadflow_core::{
    DeliveryGateway, LeadStore, LeadflowError, MessageComposer, Result, SpreadsheetAdapter,
    WriteQueue,
};
use leadflow_scheduler::{RetryExecutor, RetryLedger, RetryPolicy, RunGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::batch::{BatchWriteBuffer, FlushReport};
use crate::business_hours::BusinessHoursGate;
use crate::checkpoint::QueueCheckpointStore;
use crate::dispatcher::{Dispatcher, DispatcherSettings, DrainReport};
use crate::orchestrator::{CycleSummary, FollowupOrchestrator, OrchestratorSettings};
use crate::priority::PriorityScorer;
use crate::queue::{DeliveryQueue, QueueSettings};
use crate::status::{evaluate_health, DeliveryMetrics, HealthReport, StatusSnapshot};
use crate::throttle::ThrottleGuard;

/// How long sent/failed idempotency keys are remembered. Keys are per local
/// day, so two days covers every time zone.
const TERMINAL_RETENTION_HOURS: i64 = 48;

/// External collaborators the engine is wired against.
pub struct Collaborators {
    pub store: Arc<dyn LeadStore>,
    pub composer: Arc<dyn MessageComposer>,
    pub gateway: Arc<dyn DeliveryGateway>,
    pub sheet: Arc<dyn SpreadsheetAdapter>,
    pub write_queue: Arc<dyn WriteQueue>,
}

/// What one metrics sample did.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsTick {
    pub health: HealthReport,
    pub alerted: bool,
    /// Tasks written to the checkpoint, when checkpointing is on.
    pub checkpointed: Option<usize>,
    pub pruned: usize,
}

pub struct FollowupService {
    orchestrator: Arc<FollowupOrchestrator>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<DeliveryQueue>,
    batch: Arc<BatchWriteBuffer>,
    metrics: Arc<DeliveryMetrics>,
    ledger: Arc<RetryLedger>,
    cycle_guard: RunGuard,
    last_cycle: RwLock<Option<CycleSummary>>,
    checkpoints: Option<Mutex<QueueCheckpointStore>>,
    alert_threshold: usize,
}

impl FollowupService {
    /// Build the engine from validated configuration.
    pub fn new(cfg: &LeadflowConfig, collaborators: Collaborators) -> Result<Self> {
        let gate = Arc::new(BusinessHoursGate::from_config(&cfg.business_hours)?);
        let scorer = PriorityScorer::new(&cfg.priority)?;
        let ledger = Arc::new(RetryLedger::new());
        let executor = RetryExecutor::new(RetryPolicy::from(&cfg.retry), ledger.clone());
        let queue = Arc::new(DeliveryQueue::new(QueueSettings::from(&cfg.queue)));
        let metrics = Arc::new(DeliveryMetrics::new());

        let batch = Arc::new(BatchWriteBuffer::new(
            collaborators.write_queue,
            collaborators.sheet,
            executor.clone(),
            cfg.batch.chunk_size,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            collaborators.gateway,
            executor,
            gate.clone(),
            metrics.clone(),
            collaborators.store.clone(),
            Some(batch.clone()),
            DispatcherSettings {
                batch_size: cfg.queue.batch_size,
                batch_delay: std::time::Duration::from_millis(cfg.queue.batch_delay_ms),
            },
        ));
        let orchestrator = Arc::new(FollowupOrchestrator::new(
            collaborators.store,
            collaborators.composer,
            scorer,
            ThrottleGuard::from_seconds(cfg.followup.throttle_seconds),
            gate,
            dispatcher.clone(),
            OrchestratorSettings::from(cfg),
        ));

        Ok(Self {
            orchestrator,
            dispatcher,
            queue,
            batch,
            metrics,
            ledger,
            cycle_guard: RunGuard::new(),
            last_cycle: RwLock::new(None),
            checkpoints: None,
            alert_threshold: cfg.queue.alert_threshold,
        })
    }

    pub fn with_checkpoints(mut self, store: QueueCheckpointStore) -> Self {
        self.checkpoints = Some(Mutex::new(store));
        self
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn ledger(&self) -> &Arc<RetryLedger> {
        &self.ledger
    }

    pub async fn trigger_cycle(&self) -> Result<CycleSummary> {
        self.trigger_cycle_at(Utc::now()).await
    }

    /// Run one cycle unless one is already running.
    pub async fn trigger_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleSummary> {
        let Some(_permit) = self.cycle_guard.try_acquire() else {
            return Err(LeadflowError::CycleInProgress);
        };
        let summary = self.orchestrator.run_cycle(now).await?;
        *self.last_cycle.write().await = Some(summary.clone());
        Ok(summary)
    }

    pub async fn drain_primary(&self, now: DateTime<Utc>) -> DrainReport {
        self.dispatcher.drain_primary(now).await
    }

    pub async fn drain_retries(&self, now: DateTime<Utc>) -> DrainReport {
        self.dispatcher.drain_retries(now).await
    }

    pub async fn flush_batch(&self) -> Result<FlushReport> {
        self.batch.flush().await
    }

    /// Sample health, raise the queue alert, checkpoint and prune.
    pub async fn record_metrics(&self, now: DateTime<Utc>) -> Result<MetricsTick> {
        let health = self.health(now).await;
        let primary = health.primary_queue.size;

        let alerted = primary > self.alert_threshold;
        if alerted {
            self.metrics.record_alert(now);
            warn!(
                primary,
                threshold = self.alert_threshold,
                "Primary queue above alert threshold"
            );
        }

        let checkpointed = match &self.checkpoints {
            Some(store) => {
                let snapshot = self.queue.snapshot(now).await;
                let tasks = snapshot.len();
                store.lock().await.save(&snapshot, now)?;
                Some(tasks)
            }
            None => None,
        };

        let pruned = self
            .queue
            .prune_terminal(now - Duration::hours(TERMINAL_RETENTION_HOURS))
            .await;

        info!(
            status = ?health.status,
            failure_rate = health.failure_rate,
            primary,
            retry = health.retry_queue.size,
            pruned,
            "Delivery metrics"
        );
        Ok(MetricsTick {
            health,
            alerted,
            checkpointed,
            pruned,
        })
    }

    pub async fn health(&self, now: DateTime<Utc>) -> HealthReport {
        let settings = self.queue.settings();
        evaluate_health(
            &self.metrics.snapshot(),
            self.queue.sizes().await,
            settings.max_primary_size,
            settings.max_retry_size,
            now,
        )
    }

    pub async fn status(&self, now: DateTime<Utc>) -> StatusSnapshot {
        let batch_pending = match self.batch.pending().await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "Could not read batch queue length");
                None
            }
        };
        StatusSnapshot {
            generated_at: now,
            health: self.health(now).await,
            queues: self.queue.sizes().await,
            metrics: self.metrics.snapshot(),
            retry_totals: self.ledger.totals().await,
            retry_jobs: self.ledger.snapshot().await,
            batch_pending,
            cycle_running: self.cycle_guard.is_running(),
            last_cycle: self.last_cycle.read().await.clone(),
        }
    }

    /// Reload queued work saved by a previous process.
    pub async fn restore_checkpoint(&self) -> Result<usize> {
        let Some(store) = &self.checkpoints else {
            return Ok(0);
        };
        let snapshot = store.lock().await.load()?;
        let restored = match snapshot {
            Some(snapshot) => self.queue.restore(snapshot).await,
            None => 0,
        };
        if restored > 0 {
            info!(restored, "Restored queued deliveries from checkpoint");
        }
        Ok(restored)
    }
}
