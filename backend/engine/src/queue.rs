//! Delivery queues.
//!
//! Two FIFOs (primary and retry) plus the in-flight set and terminal record,
//! all behind one lock. Every task is tracked by idempotency key in exactly
//! one slot at a time, so no task can sit in both queues or be handed to two
//! senders.

use chrono::{DateTime, Duration, Utc};
use leadflow_config::QueueConfig;
use leadflow_core::DeliveryTask;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Sent,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "slot")]
pub enum Slot {
    Primary,
    Retry,
    InFlight,
    Terminal { state: TerminalState, at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Accepted,
    /// The key is already queued, in flight, or terminally sent.
    Duplicate(Slot),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

/// What happened to a task after a failed delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDisposition {
    Requeued {
        retry_count: u32,
        not_before: DateTime<Utc>,
    },
    Dropped {
        retry_count: u32,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSizes {
    pub primary: usize,
    pub retry: usize,
    pub in_flight: usize,
}

/// Persistable copy of the pending work. In-flight tasks are saved with the
/// retry set so a crash mid-send leads to a resend, not a loss.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueSnapshot {
    pub taken_at: Option<DateTime<Utc>>,
    pub primary: Vec<DeliveryTask>,
    pub retry: Vec<DeliveryTask>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.primary.len() + self.retry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Failed deliveries allowed before a task is dropped.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub max_primary_size: usize,
    pub max_retry_size: usize,
}

impl From<&QueueConfig> for QueueSettings {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            max_retries: cfg.max_retries.max(1),
            retry_base_delay: crate::saturating_seconds(cfg.retry_base_delay_secs),
            max_primary_size: cfg.max_primary_size,
            max_retry_size: cfg.max_retry_size,
        }
    }
}

impl QueueSettings {
    /// `base × 2^(retry_count − 1)` for the retry that follows failure
    /// number `retry_count`.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(20);
        self.retry_base_delay
            .checked_mul(1i32 << exp)
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Default)]
struct Inner {
    primary: VecDeque<DeliveryTask>,
    retry: VecDeque<DeliveryTask>,
    in_flight: HashMap<String, DeliveryTask>,
    slots: HashMap<String, Slot>,
}

impl Inner {
    fn admit(&self, key: &str) -> Admission {
        match self.slots.get(key) {
            None
            | Some(Slot::Terminal {
                state: TerminalState::Failed,
                ..
            }) => Admission::Accepted,
            Some(slot) => Admission::Duplicate(*slot),
        }
    }

    fn claim(&mut self, task: DeliveryTask) {
        self.slots.insert(task.idempotency_key.clone(), Slot::InFlight);
        self.in_flight.insert(task.idempotency_key.clone(), task);
    }

    /// Remove from in-flight; false if the key was not in flight.
    fn release(&mut self, key: &str) -> bool {
        self.in_flight.remove(key).is_some()
    }
}

pub struct DeliveryQueue {
    settings: QueueSettings,
    inner: Mutex<Inner>,
}

impl DeliveryQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Append to the primary queue for the next business-hours window.
    /// Queuing never drops a task; exceeding the cap only degrades health.
    pub async fn enqueue_primary(&self, task: DeliveryTask) -> Admission {
        let mut inner = self.inner.lock().await;
        let admission = inner.admit(&task.idempotency_key);
        if admission.is_accepted() {
            inner.slots.insert(task.idempotency_key.clone(), Slot::Primary);
            inner.primary.push_back(task);
            if inner.primary.len() > self.settings.max_primary_size {
                warn!(size = inner.primary.len(), cap = self.settings.max_primary_size, "Primary queue above cap");
            }
        }
        admission
    }

    /// Claim a task for immediate sending.
    pub async fn begin_immediate(&self, task: DeliveryTask) -> Admission {
        let mut inner = self.inner.lock().await;
        let admission = inner.admit(&task.idempotency_key);
        if admission.is_accepted() {
            inner.claim(task);
        }
        admission
    }

    /// Pop up to `max` tasks from the front of the primary queue into flight.
    pub async fn take_primary_batch(&self, max: usize) -> Vec<DeliveryTask> {
        let mut inner = self.inner.lock().await;
        let n = max.min(inner.primary.len());
        let batch: Vec<DeliveryTask> = inner.primary.drain(..n).collect();
        for task in &batch {
            inner.claim(task.clone());
        }
        batch
    }

    /// Move every retry task that is due at `now` into flight, oldest first.
    pub async fn take_due_retries(&self, now: DateTime<Utc>) -> Vec<DeliveryTask> {
        let mut inner = self.inner.lock().await;
        let (due, waiting): (VecDeque<_>, VecDeque<_>) = inner
            .retry
            .drain(..)
            .partition(|t| t.not_before.map_or(true, |at| at <= now));
        inner.retry = waiting;
        let due: Vec<DeliveryTask> = due.into_iter().collect();
        for task in &due {
            inner.claim(task.clone());
        }
        due
    }

    /// Return in-flight tasks to the back of the primary queue untouched
    /// (lead's window closed between queueing and draining).
    pub async fn defer_to_primary(&self, tasks: Vec<DeliveryTask>) {
        let mut inner = self.inner.lock().await;
        for task in tasks {
            if inner.release(&task.idempotency_key) {
                inner.slots.insert(task.idempotency_key.clone(), Slot::Primary);
                inner.primary.push_back(task);
            }
        }
    }

    /// Return in-flight tasks to the retry queue without counting a retry.
    pub async fn defer_to_retry(&self, tasks: Vec<DeliveryTask>) {
        let mut inner = self.inner.lock().await;
        for task in tasks {
            if inner.release(&task.idempotency_key) {
                inner.slots.insert(task.idempotency_key.clone(), Slot::Retry);
                inner.retry.push_back(task);
            }
        }
    }

    pub async fn complete_success(&self, task: &DeliveryTask, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        if !inner.release(&task.idempotency_key) {
            debug!(key = %task.idempotency_key, "Success reported for task not in flight");
        }
        inner.slots.insert(
            task.idempotency_key.clone(),
            Slot::Terminal {
                state: TerminalState::Sent,
                at: now,
            },
        );
    }

    /// Record a retryable delivery failure: the task goes to the retry queue
    /// with a grown delay, or is dropped once it has used every retry.
    pub async fn complete_failure(
        &self,
        task: &DeliveryTask,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        let mut inner = self.inner.lock().await;
        let mut task = inner
            .in_flight
            .remove(&task.idempotency_key)
            .unwrap_or_else(|| task.clone());
        task.retry_count += 1;

        if task.retry_count >= self.settings.max_retries {
            inner.slots.insert(
                task.idempotency_key.clone(),
                Slot::Terminal {
                    state: TerminalState::Failed,
                    at: now,
                },
            );
            return FailureDisposition::Dropped {
                retry_count: task.retry_count,
            };
        }

        let not_before = now
            .checked_add_signed(self.settings.retry_delay(task.retry_count))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        task.not_before = Some(not_before);
        let retry_count = task.retry_count;
        inner.slots.insert(task.idempotency_key.clone(), Slot::Retry);
        inner.retry.push_back(task);
        if inner.retry.len() > self.settings.max_retry_size {
            warn!(size = inner.retry.len(), cap = self.settings.max_retry_size, "Retry queue above cap");
        }
        FailureDisposition::Requeued {
            retry_count,
            not_before,
        }
    }

    /// Record a failure no retry can fix.
    pub async fn complete_rejected(&self, task: &DeliveryTask, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner.release(&task.idempotency_key);
        inner.slots.insert(
            task.idempotency_key.clone(),
            Slot::Terminal {
                state: TerminalState::Failed,
                at: now,
            },
        );
    }

    pub async fn slot_of(&self, idempotency_key: &str) -> Option<Slot> {
        self.inner.lock().await.slots.get(idempotency_key).copied()
    }

    pub async fn sizes(&self) -> QueueSizes {
        let inner = self.inner.lock().await;
        QueueSizes {
            primary: inner.primary.len(),
            retry: inner.retry.len(),
            in_flight: inner.in_flight.len(),
        }
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> QueueSnapshot {
        let inner = self.inner.lock().await;
        QueueSnapshot {
            taken_at: Some(now),
            primary: inner.primary.iter().cloned().collect(),
            retry: inner
                .retry
                .iter()
                .chain(inner.in_flight.values())
                .cloned()
                .collect(),
        }
    }

    /// Load a snapshot taken by a previous process. Keys already known to
    /// this queue are skipped. Returns the number of tasks restored.
    pub async fn restore(&self, snapshot: QueueSnapshot) -> usize {
        let mut inner = self.inner.lock().await;
        let mut restored = 0;
        for (tasks, slot) in [(snapshot.primary, Slot::Primary), (snapshot.retry, Slot::Retry)] {
            for task in tasks {
                if !inner.admit(&task.idempotency_key).is_accepted() {
                    continue;
                }
                inner.slots.insert(task.idempotency_key.clone(), slot);
                match slot {
                    Slot::Primary => inner.primary.push_back(task),
                    _ => inner.retry.push_back(task),
                }
                restored += 1;
            }
        }
        restored
    }

    /// Forget terminal records older than `before`. Returns how many.
    pub async fn prune_terminal(&self, before: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock().await;
        let len = inner.slots.len();
        inner
            .slots
            .retain(|_, slot| !matches!(slot, Slot::Terminal { at, .. } if *at < before));
        len - inner.slots.len()
    }
}
