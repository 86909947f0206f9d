//! Default values for every config section.

use crate::schema::{
    BatchConfig, BusinessHoursConfig, FollowupConfig, GatewayConfig, GatewayKind, LoggingConfig,
    PriorityConfig, PriorityWeights, QueueConfig, RetryConfig, ServerConfig, StorageConfig,
};
use std::collections::HashMap;

/// One day.
pub const DEFAULT_THROTTLE_SECONDS: u64 = 86_400;
pub const DEFAULT_MIN_SCORE: f64 = 0.4;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Top of every hour from 09:00 to 16:00, weekdays.
pub const DEFAULT_CYCLE_CRON: &str = "0 9-16 * * Mon-Fri";
pub const DEFAULT_PRIMARY_DRAIN_CRON: &str = "15 9-16 * * Mon-Fri";
pub const DEFAULT_BATCH_FLUSH_CRON: &str = "45 9-16 * * Mon-Fri";

pub const DEFAULT_HALF_LIFE_DAYS: f64 = 14.0;
pub const DEFAULT_ENGAGEMENT_WINDOW_DAYS: i64 = 30;

pub const DEFAULT_START_HOUR: u32 = 9;
pub const DEFAULT_END_HOUR: u32 = 17;
pub const DEFAULT_AREA_CODE: &str = "212";
/// US Eastern standard time.
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = -5;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;
pub const DEFAULT_RETRY_UNIT_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;

pub const DEFAULT_QUEUE_BATCH_SIZE: usize = 50;
pub const DEFAULT_QUEUE_BATCH_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 900;
pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 60;
pub const DEFAULT_MAX_PRIMARY_SIZE: usize = 1_000;
pub const DEFAULT_MAX_RETRY_SIZE: usize = 100;
pub const DEFAULT_QUEUE_ALERT_THRESHOLD: usize = 1_000;
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 60;

pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 500;

pub const DEFAULT_RATE_PER_MINUTE: u32 = 60;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

/// Upper bound for any interval setting given in seconds (ten years).
pub const MAX_INTERVAL_SECS: u64 = 10 * 365 * 86_400;

pub const DEFAULT_DB_PATH: &str = "leadflow.db";
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

impl Default for FollowupConfig {
    fn default() -> Self {
        Self {
            throttle_seconds: DEFAULT_THROTTLE_SECONDS,
            min_score: DEFAULT_MIN_SCORE,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            cycle_cron: DEFAULT_CYCLE_CRON.to_string(),
        }
    }
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            recency: 0.30,
            engagement: 0.15,
            classification: 0.15,
            source: 0.10,
            interaction_frequency: 0.10,
            value: 0.10,
            time_since_contact: 0.10,
        }
    }
}

fn table(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            weights: PriorityWeights::default(),
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
            engagement_window_days: DEFAULT_ENGAGEMENT_WINDOW_DAYS,
            classification_scores: table(&[
                ("hot", 1.0),
                ("warm", 0.7),
                ("cold", 0.3),
                ("default", 0.5),
            ]),
            source_scores: table(&[
                ("referral", 1.0),
                ("website", 0.9),
                ("social", 0.8),
                ("email", 0.7),
                ("phone", 0.6),
                ("other", 0.5),
                ("default", 0.5),
            ]),
        }
    }
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            start_hour: DEFAULT_START_HOUR,
            end_hour: DEFAULT_END_HOUR,
            weekdays: ["mon", "tue", "wed", "thu", "fri"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            default_area_code: DEFAULT_AREA_CODE.to_string(),
            default_utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            unit_ms: DEFAULT_RETRY_UNIT_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            jitter: true,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_QUEUE_BATCH_SIZE,
            batch_delay_ms: DEFAULT_QUEUE_BATCH_DELAY_MS,
            primary_cron: DEFAULT_PRIMARY_DRAIN_CRON.to_string(),
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_secs: DEFAULT_RETRY_BASE_DELAY_SECS,
            max_primary_size: DEFAULT_MAX_PRIMARY_SIZE,
            max_retry_size: DEFAULT_MAX_RETRY_SIZE,
            alert_threshold: DEFAULT_QUEUE_ALERT_THRESHOLD,
            metrics_interval_secs: DEFAULT_METRICS_INTERVAL_SECS,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
            flush_cron: DEFAULT_BATCH_FLUSH_CRON.to_string(),
        }
    }
}

impl Default for GatewayKind {
    fn default() -> Self {
        GatewayKind::Log
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: GatewayKind::default(),
            webhook_url: None,
            fallback_webhook_url: None,
            rate_per_minute: DEFAULT_RATE_PER_MINUTE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            checkpoint: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            json: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::LeadflowConfig;

    #[test]
    fn default_weights_sum_to_one() {
        let config = LeadflowConfig::default();
        assert!((config.priority.weights.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn default_window_is_nine_to_five_weekdays() {
        let hours = LeadflowConfig::default().business_hours;
        assert_eq!((hours.start_hour, hours.end_hour), (9, 17));
        assert_eq!(hours.parsed_weekdays().unwrap().len(), 5);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = "followup:\n  minScore: 0.6\nqueue:\n  batchSize: 10\n";
        let config: LeadflowConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.followup.min_score, 0.6);
        assert_eq!(config.followup.throttle_seconds, 86_400);
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.queue.max_retry_size, 100);
        assert_eq!(config.batch.chunk_size, 500);
    }
}
