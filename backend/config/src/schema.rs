//! Leadflow runtime configuration schema.
//!
//! Every section is optional in the YAML file; missing keys fall back to the
//! values in [`crate::defaults`].

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the follow-up engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeadflowConfig {
    pub followup: FollowupConfig,
    pub priority: PriorityConfig,
    pub business_hours: BusinessHoursConfig,
    pub retry: RetryConfig,
    pub queue: QueueConfig,
    pub batch: BatchConfig,
    pub gateway: GatewayConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FollowupConfig {
    /// Minimum seconds between two contacts of the same lead.
    pub throttle_seconds: u64,
    /// Leads scoring below this are skipped for the cycle.
    pub min_score: f64,
    /// Conversation messages fetched per lead for scoring and composing.
    pub history_limit: usize,
    /// Upper bound on concurrently processed leads within a cycle.
    pub max_concurrency: usize,
    /// 5-field cron expression for the orchestration cycle.
    pub cycle_cron: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriorityWeights {
    pub recency: f64,
    pub engagement: f64,
    pub classification: f64,
    pub source: f64,
    pub interaction_frequency: f64,
    pub value: f64,
    pub time_since_contact: f64,
}

impl PriorityWeights {
    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }

    pub fn as_array(&self) -> [f64; 7] {
        [
            self.recency,
            self.engagement,
            self.classification,
            self.source,
            self.interaction_frequency,
            self.value,
            self.time_since_contact,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriorityConfig {
    pub weights: PriorityWeights,
    pub half_life_days: f64,
    pub engagement_window_days: i64,
    /// Keyed by lowercase classification; `default` covers unknown values.
    pub classification_scores: HashMap<String, f64>,
    /// Keyed by lowercase lead source; `default` covers unknown values.
    pub source_scores: HashMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusinessHoursConfig {
    /// First local hour (inclusive) at which delivery is attempted.
    pub start_hour: u32,
    /// Local hour (exclusive) at which delivery stops.
    pub end_hour: u32,
    /// Day names, e.g. `["mon", "tue"]`.
    pub weekdays: Vec<String>,
    pub default_area_code: String,
    /// Offset used when a lead's area code maps to no known zone.
    pub default_utc_offset_hours: i32,
}

impl BusinessHoursConfig {
    /// Parse the configured day names.
    pub fn parsed_weekdays(&self) -> Result<Vec<Weekday>, String> {
        self.weekdays
            .iter()
            .map(|d| {
                d.trim()
                    .parse::<Weekday>()
                    .map_err(|_| format!("unknown weekday '{d}'"))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first.
    pub max_retries: u32,
    pub backoff_base: f64,
    /// Delay unit multiplied by `backoff_base^attempt`.
    pub unit_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    /// Tasks sent per chunk when draining the primary queue.
    pub batch_size: usize,
    /// Pause between primary-queue chunks.
    pub batch_delay_ms: u64,
    pub primary_cron: String,
    pub retry_interval_secs: u64,
    /// Delivery attempts through the retry queue before a task is dropped.
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
    pub max_primary_size: usize,
    pub max_retry_size: usize,
    pub alert_threshold: usize,
    pub metrics_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchConfig {
    pub chunk_size: usize,
    pub flush_cron: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// Log every send and report success. For dry runs.
    Log,
    /// POST each task as JSON to `webhookUrl`.
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub kind: GatewayKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Secondary channel tried when the primary gateway fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_webhook_url: Option<String>,
    pub rate_per_minute: u32,
    pub max_in_flight: usize,
    pub timeout_secs: u64,
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Persist delivery-queue snapshots on every metrics tick.
    pub checkpoint: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
    pub json: bool,
}
