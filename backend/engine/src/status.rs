//! Delivery metrics and the health/status snapshot served to health checks.

use chrono::{DateTime, TimeZone, Utc};
use leadflow_scheduler::JobStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::orchestrator::CycleSummary;
use crate::queue::QueueSizes;

/// Failure rate at or above which the service reports degraded.
pub const MAX_HEALTHY_FAILURE_RATE: f64 = 0.10;

/// Lock-free delivery counters. Timestamps are epoch millis, 0 = never.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    sent: AtomicU64,
    failed: AtomicU64,
    requeued: AtomicU64,
    deferred: AtomicU64,
    last_success_ms: AtomicI64,
    last_error_ms: AtomicI64,
    last_alert_ms: AtomicI64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub sent: u64,
    /// Terminal failures (dropped or rejected).
    pub failed: u64,
    /// Failures that went back to the retry queue.
    pub requeued: u64,
    /// Tasks queued for a later business-hours window.
    pub deferred: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// failed ÷ (sent + failed); 0 before any terminal outcome.
    pub fn failure_rate(&self) -> f64 {
        let total = self.sent + self.failed;
        if total == 0 {
            0.0
        } else {
            self.failed as f64 / total as f64
        }
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        None
    } else {
        Utc.timestamp_millis_opt(ms).single()
    }
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, at: DateTime<Utc>) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.last_success_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_failed(&self, at: DateTime<Utc>) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.last_error_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_requeued(&self, at: DateTime<Utc>) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
        self.last_error_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self, at: DateTime<Utc>) {
        self.last_alert_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            last_success_at: from_millis(self.last_success_ms.load(Ordering::Relaxed)),
            last_error_at: from_millis(self.last_error_ms.load(Ordering::Relaxed)),
            last_alert_at: from_millis(self.last_alert_ms.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Ok,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
    pub size: usize,
    pub cap: usize,
    pub state: QueueState,
}

impl QueueHealth {
    fn new(size: usize, cap: usize) -> Self {
        let state = if size < cap {
            QueueState::Ok
        } else {
            QueueState::Warning
        };
        Self { size, cap, state }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub failure_rate: f64,
    pub primary_queue: QueueHealth,
    pub retry_queue: QueueHealth,
    pub seconds_since_last_success: Option<i64>,
    pub seconds_since_last_error: Option<i64>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Healthy iff the failure rate is below 10% and both queues are below caps.
pub fn evaluate_health(
    metrics: &MetricsSnapshot,
    sizes: QueueSizes,
    primary_cap: usize,
    retry_cap: usize,
    now: DateTime<Utc>,
) -> HealthReport {
    let failure_rate = metrics.failure_rate();
    let primary_queue = QueueHealth::new(sizes.primary, primary_cap);
    let retry_queue = QueueHealth::new(sizes.retry, retry_cap);
    let healthy = failure_rate < MAX_HEALTHY_FAILURE_RATE
        && primary_queue.state == QueueState::Ok
        && retry_queue.state == QueueState::Ok;
    HealthReport {
        status: if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        },
        failure_rate,
        primary_queue,
        retry_queue,
        seconds_since_last_success: metrics.last_success_at.map(|t| (now - t).num_seconds()),
        seconds_since_last_error: metrics.last_error_at.map(|t| (now - t).num_seconds()),
    }
}

/// Everything the operational surface reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    pub health: HealthReport,
    pub queues: QueueSizes,
    pub metrics: MetricsSnapshot,
    pub retry_totals: JobStats,
    pub retry_jobs: BTreeMap<String, JobStats>,
    pub batch_pending: Option<usize>,
    pub cycle_running: bool,
    pub last_cycle: Option<CycleSummary>,
}
