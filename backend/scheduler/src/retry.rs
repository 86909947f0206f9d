//! Retry engine: bounded attempts with exponential backoff and jitter, plus
//! the process-wide ledger of retry and failure counts per job.

use chrono::{DateTime, Utc};
use leadflow_config::RetryConfig;
use leadflow_core::LeadflowError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Exponential factor applied per failed attempt.
    pub backoff_base: f64,
    /// Delay unit in milliseconds; also the jitter range.
    pub unit_ms: u64,
    /// Maximum delay cap in milliseconds (before jitter).
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries.max(1),
            backoff_base: cfg.backoff_base,
            unit_ms: cfg.unit_ms,
            max_delay_ms: cfg.max_delay_ms,
            jitter: cfg.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay after `failed_attempts` failures: `unit * base^n`, capped, plus
    /// uniform jitter in `[0, unit)`.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let exp = failed_attempts.min(i32::MAX as u32) as i32;
        let delay_ms = (self.unit_ms as f64 * self.backoff_base.powi(exp))
            .min(self.max_delay_ms as f64)
            .max(0.0) as u64;

        let jitter_ms = if self.jitter && self.unit_ms > 0 {
            rand::thread_rng().gen_range(0..self.unit_ms)
        } else {
            0
        };

        Duration::from_millis(delay_ms.saturating_add(jitter_ms))
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub attempt: u32,
    pub error_kind: String,
    pub message: String,
}

/// Counters for one job name. `retries` counts intermediate failures that
/// were followed by another attempt; `failures` counts terminal ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub attempts: u64,
    pub retries: u64,
    pub failures: u64,
    pub successes: u64,
    pub last_retry: Option<FailureRecord>,
    pub last_failure: Option<FailureRecord>,
}

/// Process-wide retry accounting. State, not an audit log: it is never
/// persisted and resets on restart.
#[derive(Debug, Default)]
pub struct RetryLedger {
    jobs: Mutex<BTreeMap<String, JobStats>>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_attempt(&self, job: &str) {
        self.jobs.lock().await.entry(job.to_string()).or_default().attempts += 1;
    }

    pub async fn record_success(&self, job: &str) {
        self.jobs.lock().await.entry(job.to_string()).or_default().successes += 1;
    }

    pub async fn record_retry(&self, job: &str, attempt: u32, err: &LeadflowError) {
        let mut jobs = self.jobs.lock().await;
        let stats = jobs.entry(job.to_string()).or_default();
        stats.retries += 1;
        stats.last_retry = Some(FailureRecord {
            at: Utc::now(),
            attempt,
            error_kind: err.kind().to_string(),
            message: err.to_string(),
        });
        debug!(job, attempt, error_kind = err.kind(), "Retry recorded");
    }

    pub async fn record_failure(&self, job: &str, attempt: u32, err: &LeadflowError) {
        let mut jobs = self.jobs.lock().await;
        let stats = jobs.entry(job.to_string()).or_default();
        stats.failures += 1;
        stats.last_failure = Some(FailureRecord {
            at: Utc::now(),
            attempt,
            error_kind: err.kind().to_string(),
            message: err.to_string(),
        });
    }

    pub async fn stats(&self, job: &str) -> JobStats {
        self.jobs.lock().await.get(job).cloned().unwrap_or_default()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, JobStats> {
        self.jobs.lock().await.clone()
    }

    /// Sum of counters across all jobs.
    pub async fn totals(&self) -> JobStats {
        let jobs = self.jobs.lock().await;
        let mut total = JobStats::default();
        for stats in jobs.values() {
            total.attempts += stats.attempts;
            total.retries += stats.retries;
            total.failures += stats.failures;
            total.successes += stats.successes;
            keep_newest(&mut total.last_retry, &stats.last_retry);
            keep_newest(&mut total.last_failure, &stats.last_failure);
        }
        total
    }
}

fn keep_newest(current: &mut Option<FailureRecord>, candidate: &Option<FailureRecord>) {
    let newer = match (current.as_ref(), candidate) {
        (None, Some(_)) => true,
        (Some(a), Some(b)) => b.at > a.at,
        _ => false,
    };
    if newer {
        *current = candidate.clone();
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Outcome of one retried invocation. Exactly one variant is produced per call.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    /// Retryable errors used up every attempt.
    Exhausted { error: LeadflowError, attempts: u32 },
    /// A non-retryable error stopped the loop early.
    Rejected { error: LeadflowError, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Rejected { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, LeadflowError> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Ok(value),
            RetryOutcome::Exhausted { error, .. } | RetryOutcome::Rejected { error, .. } => {
                Err(error)
            }
        }
    }
}

/// Wraps fallible async operations with bounded retries. Channel-agnostic:
/// the same executor serves delivery, store writes and batch flushes.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    ledger: Arc<RetryLedger>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, ledger: Arc<RetryLedger>) -> Self {
        Self { policy, ledger }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Arc<RetryLedger> {
        &self.ledger
    }

    /// Run `op` until it succeeds, fails non-retryably, or runs out of
    /// attempts. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, job: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LeadflowError>>,
    {
        let max = self.policy.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.ledger.record_attempt(job).await;

            let err = match op(attempt).await {
                Ok(value) => {
                    self.ledger.record_success(job).await;
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    };
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                self.ledger.record_failure(job, attempt, &err).await;
                error!(job, attempt, error_kind = err.kind(), error = %err, "Non-retryable failure");
                return RetryOutcome::Rejected {
                    error: err,
                    attempts: attempt,
                };
            }

            if attempt >= max {
                self.ledger.record_failure(job, attempt, &err).await;
                error!(job, attempts = attempt, error_kind = err.kind(), error = %err, "Retries exhausted");
                return RetryOutcome::Exhausted {
                    error: err,
                    attempts: attempt,
                };
            }

            self.ledger.record_retry(job, attempt, &err).await;
            let delay = self.policy.delay_for(attempt);
            warn!(
                job,
                attempt,
                max,
                delay_ms = delay.as_millis() as u64,
                error_kind = err.kind(),
                error = %err,
                "Attempt failed, will retry"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
