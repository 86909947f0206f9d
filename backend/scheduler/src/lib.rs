pub mod cron_parser;
pub mod retry;
pub mod run_guard;
pub mod run_log;
pub mod scheduler;

pub use cron_parser::{next_fire, parse_schedule, validate_cron};
pub use retry::{FailureRecord, JobStats, RetryExecutor, RetryLedger, RetryOutcome, RetryPolicy};
pub use run_guard::{RunGuard, RunPermit};
pub use run_log::{RunLog, RunLogEntry, RunStatus};
pub use scheduler::{Job, Scheduler, Trigger};
