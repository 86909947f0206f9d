//! Scheduler jobs wrapping the service operations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use leadflow_config::LeadflowConfig;
use leadflow_core::LeadflowError;
use leadflow_scheduler::{Job, Scheduler};
use std::sync::Arc;
use std::time::Duration;

use crate::service::FollowupService;

pub const CYCLE_JOB: &str = "followup_cycle";
pub const PRIMARY_DRAIN_JOB: &str = "primary_drain";
pub const RETRY_DRAIN_JOB: &str = "retry_drain";
pub const BATCH_FLUSH_JOB: &str = "batch_flush";
pub const METRICS_JOB: &str = "metrics";

pub struct CycleJob(pub Arc<FollowupService>);

#[async_trait]
impl Job for CycleJob {
    fn name(&self) -> &str {
        CYCLE_JOB
    }

    async fn run(&self) -> Result<String> {
        match self.0.trigger_cycle().await {
            Ok(s) => Ok(format!(
                "candidates={} dispatched={} sent={} queued={} failed={}",
                s.candidates, s.dispatched, s.sent, s.queued, s.failed
            )),
            // A manual trigger got there first.
            Err(LeadflowError::CycleInProgress) => Ok("skipped: cycle already running".into()),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct PrimaryDrainJob(pub Arc<FollowupService>);

#[async_trait]
impl Job for PrimaryDrainJob {
    fn name(&self) -> &str {
        PRIMARY_DRAIN_JOB
    }

    async fn run(&self) -> Result<String> {
        let r = self.0.drain_primary(Utc::now()).await;
        Ok(format!(
            "taken={} sent={} requeued={} failed={} deferred={}",
            r.taken, r.sent, r.requeued, r.failed, r.deferred
        ))
    }
}

pub struct RetryDrainJob(pub Arc<FollowupService>);

#[async_trait]
impl Job for RetryDrainJob {
    fn name(&self) -> &str {
        RETRY_DRAIN_JOB
    }

    async fn run(&self) -> Result<String> {
        let r = self.0.drain_retries(Utc::now()).await;
        Ok(format!(
            "taken={} sent={} requeued={} failed={}",
            r.taken, r.sent, r.requeued, r.failed
        ))
    }
}

pub struct BatchFlushJob(pub Arc<FollowupService>);

#[async_trait]
impl Job for BatchFlushJob {
    fn name(&self) -> &str {
        BATCH_FLUSH_JOB
    }

    async fn run(&self) -> Result<String> {
        let r = self.0.flush_batch().await?;
        if r.lost > 0 {
            anyhow::bail!("{} of {} sheet updates lost", r.lost, r.dequeued);
        }
        if let Some(e) = r.dequeue_error {
            anyhow::bail!("flush stopped after {} sheet updates: {e}", r.written);
        }
        Ok(format!("written={} chunks={}", r.written, r.chunks.len()))
    }
}

pub struct MetricsJob(pub Arc<FollowupService>);

#[async_trait]
impl Job for MetricsJob {
    fn name(&self) -> &str {
        METRICS_JOB
    }

    async fn run(&self) -> Result<String> {
        let tick = self.0.record_metrics(Utc::now()).await?;
        Ok(format!(
            "status={:?} failure_rate={:.3} primary={} retry={}",
            tick.health.status,
            tick.health.failure_rate,
            tick.health.primary_queue.size,
            tick.health.retry_queue.size
        ))
    }
}

/// Register every engine job on its configured cadence.
pub fn register_jobs(
    scheduler: &mut Scheduler,
    service: Arc<FollowupService>,
    cfg: &LeadflowConfig,
) -> Result<()> {
    scheduler.add_cron(Arc::new(CycleJob(service.clone())), &cfg.followup.cycle_cron)?;
    scheduler.add_cron(Arc::new(PrimaryDrainJob(service.clone())), &cfg.queue.primary_cron)?;
    scheduler.add_interval(
        Arc::new(RetryDrainJob(service.clone())),
        Duration::from_secs(cfg.queue.retry_interval_secs.max(1)),
    );
    scheduler.add_cron(Arc::new(BatchFlushJob(service.clone())), &cfg.batch.flush_cron)?;
    scheduler.add_interval(
        Arc::new(MetricsJob(service)),
        Duration::from_secs(cfg.queue.metrics_interval_secs.max(1)),
    );
    Ok(())
}
