//! Follow-up orchestration and delivery reliability.
//!
//! Leaves first: [`priority`], [`throttle`], [`business_hours`] and the retry
//! executor from `leadflow-scheduler`; then the [`queue`] and [`batch`]
//! buffers; the [`dispatcher`] and [`orchestrator`] on top; [`service`] wires
//! them together and [`jobs`] puts them on the scheduler.

pub mod batch;
pub mod business_hours;
pub mod checkpoint;
pub mod dispatcher;
pub mod jobs;
pub mod orchestrator;
pub mod priority;
pub mod queue;
pub mod service;
pub mod status;
pub mod throttle;
pub mod timezone;

#[cfg(test)]
mod testing;

pub use batch::{BatchWriteBuffer, ChunkReport, FlushReport, InMemoryWriteQueue};
pub use business_hours::{is_now_within_window, BusinessHoursGate};
pub use checkpoint::QueueCheckpointStore;
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherSettings, DrainReport};
pub use jobs::register_jobs;
pub use orchestrator::{CycleSummary, FailureCounts, FollowupOrchestrator, OrchestratorSettings};
pub use priority::PriorityScorer;
pub use queue::{Admission, DeliveryQueue, QueueSettings, QueueSizes, QueueSnapshot, Slot};
pub use service::{Collaborators, FollowupService, MetricsTick};
pub use status::{
    evaluate_health, DeliveryMetrics, HealthReport, HealthStatus, MetricsSnapshot, StatusSnapshot,
};
pub use throttle::ThrottleGuard;
pub use timezone::AreaCodeZones;

/// Seconds as a chrono [`Duration`], saturating instead of panicking.
pub(crate) fn saturating_seconds(seconds: u64) -> chrono::Duration {
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}
