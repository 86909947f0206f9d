use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use cron::Schedule;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cron_parser::{next_fire, parse_schedule};
use crate::run_guard::RunGuard;
use crate::run_log::{RunLog, RunLogEntry, RunStatus};

/// A unit of scheduled work. `run` returns a one-line summary for the run log.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> Result<String>;
}

pub enum Trigger {
    /// Fires on a cron schedule evaluated in the scheduler's offset.
    Cron {
        expression: String,
        schedule: Box<Schedule>,
    },
    /// Fires every `period`, first time one period after start.
    Interval(Duration),
}

struct Entry {
    job: Arc<dyn Job>,
    trigger: Trigger,
    guard: RunGuard,
    next_fire: Option<Instant>,
}

/// Drives jobs on fixed cadences. Each job has its own run guard, so a slow
/// run is never overlapped by the next tick of the same job; other jobs keep
/// firing independently.
pub struct Scheduler {
    entries: Vec<Entry>,
    offset: FixedOffset,
    tick: Duration,
    run_log: Option<Arc<Mutex<RunLog>>>,
}

impl Scheduler {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            entries: Vec::new(),
            offset,
            tick: Duration::from_secs(1),
            run_log: None,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_run_log(mut self, run_log: Arc<Mutex<RunLog>>) -> Self {
        self.run_log = Some(run_log);
        self
    }

    /// Register a job on a 5-field cron expression.
    pub fn add_cron(&mut self, job: Arc<dyn Job>, expression: &str) -> Result<()> {
        let schedule = parse_schedule(expression)?;
        info!(job = %job.name(), cron = %expression, "Registered cron trigger");
        self.entries.push(Entry {
            job,
            trigger: Trigger::Cron {
                expression: expression.to_string(),
                schedule: Box::new(schedule),
            },
            guard: RunGuard::new(),
            next_fire: None,
        });
        Ok(())
    }

    pub fn add_interval(&mut self, job: Arc<dyn Job>, period: Duration) {
        info!(job = %job.name(), interval_ms = period.as_millis() as u64, "Registered interval trigger");
        self.entries.push(Entry {
            job,
            trigger: Trigger::Interval(period),
            guard: RunGuard::new(),
            next_fire: None,
        });
    }

    pub fn job_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.job.name().to_string()).collect()
    }

    fn compute_next(&self, trigger: &Trigger, now: Instant) -> Option<Instant> {
        match trigger {
            Trigger::Interval(period) => Some(now + *period),
            Trigger::Cron { schedule, .. } => {
                let wall_now = Utc::now();
                next_fire(schedule, self.offset, wall_now).map(|next| {
                    let until = (next - wall_now).to_std().unwrap_or(Duration::ZERO);
                    now + until
                })
            }
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped), then
    /// wait for in-flight job runs to finish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let start = Instant::now();
        for i in 0..self.entries.len() {
            let next = self.compute_next(&self.entries[i].trigger, start);
            if let (Trigger::Cron { expression, .. }, None) = (&self.entries[i].trigger, next) {
                warn!(cron = %expression, "Cron expression never fires");
            }
            self.entries[i].next_fire = next;
        }
        info!(jobs = self.entries.len(), "Scheduler started");

        let mut ticker = time::interval(self.tick);
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    for i in 0..self.entries.len() {
                        let due = matches!(self.entries[i].next_fire, Some(at) if now >= at);
                        if !due {
                            continue;
                        }
                        if let Some(handle) = self.fire(&self.entries[i]) {
                            handles.push(handle);
                        }
                        let next = self.compute_next(&self.entries[i].trigger, now);
                        self.entries[i].next_fire = next;
                    }
                    reap(&mut handles).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = handles.len(), "Scheduler stopping");
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Job task ended abnormally");
            }
        }
        Ok(())
    }

    fn fire(&self, entry: &Entry) -> Option<JoinHandle<()>> {
        let name = entry.job.name().to_string();
        let run_log = self.run_log.clone();

        let Some(permit) = entry.guard.try_acquire() else {
            warn!(job = %name, "Previous run still active, skipping this tick");
            tokio::spawn(record(run_log, RunLogEntry::new(&name, RunStatus::Skipped)));
            return None;
        };

        let job = entry.job.clone();
        Some(tokio::spawn(async move {
            let _permit = permit;
            let run_id = Uuid::new_v4();
            let started = Instant::now();
            info!(job = %name, run_id = %run_id, "Job fired");

            let result = job.run().await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let entry = match result {
                Ok(summary) => {
                    info!(job = %name, run_id = %run_id, elapsed_ms, summary = %summary, "Job finished");
                    let mut entry = RunLogEntry::new(&name, RunStatus::Ok);
                    entry.output_summary = Some(summary);
                    entry
                }
                Err(e) => {
                    error!(job = %name, run_id = %run_id, elapsed_ms, error = %format!("{e:#}"), "Job failed");
                    let mut entry = RunLogEntry::new(&name, RunStatus::Error);
                    entry.error = Some(format!("{e:#}"));
                    entry
                }
            };
            record(run_log, entry).await;
        }))
    }
}

async fn reap(handles: &mut Vec<JoinHandle<()>>) {
    let mut pending = Vec::with_capacity(handles.len());
    for handle in handles.drain(..) {
        if handle.is_finished() {
            if let Err(e) = handle.await {
                error!(error = %e, "Job task ended abnormally");
            }
        } else {
            pending.push(handle);
        }
    }
    *handles = pending;
}

async fn record(run_log: Option<Arc<Mutex<RunLog>>>, entry: RunLogEntry) {
    let Some(log) = run_log else { return };
    let result = log.lock().await.record(&entry);
    if let Err(e) = result {
        debug!(job = %entry.job, error = %e, "Failed to write run log entry");
    }
}
