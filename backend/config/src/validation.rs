//! Config validation. Errors are fatal at startup; warnings are logged.

use crate::defaults::MAX_INTERVAL_SECS;
use crate::schema::{GatewayKind, LeadflowConfig};
use thiserror::Error;

/// A config validation problem with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// All error messages joined for a single startup failure line.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

pub fn validate(config: &LeadflowConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_followup(config, &mut report);
    validate_priority(config, &mut report);
    validate_business_hours(config, &mut report);
    validate_retry(config, &mut report);
    validate_queue(config, &mut report);
    validate_gateway(config, &mut report);
    validate_server(config, &mut report);
    report
}

fn validate_followup(config: &LeadflowConfig, report: &mut ValidationReport) {
    let f = &config.followup;
    if !(0.0..=1.0).contains(&f.min_score) {
        report.error("followup.minScore", "minScore must be within [0, 1]");
    }
    if f.max_concurrency == 0 {
        report.error("followup.maxConcurrency", "maxConcurrency must be >= 1");
    } else if f.max_concurrency > 100 {
        report.warn("followup.maxConcurrency", "maxConcurrency above 100 may overwhelm the gateway");
    }
    if f.history_limit == 0 {
        report.warn("followup.historyLimit", "historyLimit 0 disables engagement scoring");
    }
    if f.throttle_seconds == 0 {
        report.warn("followup.throttleSeconds", "throttle disabled; leads may be contacted every cycle");
    }
    check_interval(f.throttle_seconds, "followup.throttleSeconds", report);
    check_cron(&f.cycle_cron, "followup.cycleCron", report);
}

fn validate_priority(config: &LeadflowConfig, report: &mut ValidationReport) {
    let p = &config.priority;
    let weights = p.weights.as_array();
    if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
        report.error("priority.weights", "each weight must be within [0, 1]");
    }
    let sum = p.weights.sum();
    if (sum - 1.0).abs() > 1e-6 {
        report.error(
            "priority.weights",
            format!("weights must sum to 1.0 (got {sum:.4})"),
        );
    }
    if !(p.half_life_days.is_finite() && p.half_life_days > 0.0) {
        report.error("priority.halfLifeDays", "halfLifeDays must be > 0");
    }
    if p.engagement_window_days <= 0 {
        report.error("priority.engagementWindowDays", "engagementWindowDays must be > 0");
    } else {
        check_interval(
            (p.engagement_window_days as u64).saturating_mul(86_400),
            "priority.engagementWindowDays",
            report,
        );
    }
    for (table, path) in [
        (&p.classification_scores, "priority.classificationScores"),
        (&p.source_scores, "priority.sourceScores"),
    ] {
        if table.values().any(|v| !(0.0..=1.0).contains(v)) {
            report.error(path, "table values must be within [0, 1]");
        }
        if !table.contains_key("default") {
            report.warn(path, "no 'default' entry; unknown values score 0.5");
        }
    }
}

fn validate_business_hours(config: &LeadflowConfig, report: &mut ValidationReport) {
    let b = &config.business_hours;
    if b.start_hour > 23 || b.end_hour > 24 || b.start_hour >= b.end_hour {
        report.error(
            "businessHours",
            format!(
                "window [{}, {}) must satisfy 0 <= start < end <= 24",
                b.start_hour, b.end_hour
            ),
        );
    }
    match b.parsed_weekdays() {
        Ok(days) if days.is_empty() => {
            report.error("businessHours.weekdays", "at least one weekday is required")
        }
        Ok(_) => {}
        Err(e) => report.error("businessHours.weekdays", e),
    }
    if !(-12..=14).contains(&b.default_utc_offset_hours) {
        report.error("businessHours.defaultUtcOffsetHours", "offset must be within [-12, 14]");
    }
    if b.default_area_code.len() != 3 || !b.default_area_code.chars().all(|c| c.is_ascii_digit()) {
        report.warn("businessHours.defaultAreaCode", "area code should be 3 digits");
    }
}

fn validate_retry(config: &LeadflowConfig, report: &mut ValidationReport) {
    let r = &config.retry;
    if r.max_retries == 0 {
        report.error("retry.maxRetries", "maxRetries must be >= 1");
    }
    if !(r.backoff_base.is_finite() && r.backoff_base >= 1.0) {
        report.error("retry.backoffBase", "backoffBase must be >= 1.0");
    }
    check_interval(r.unit_ms / 1_000, "retry.unitMs", report);
    check_interval(r.max_delay_ms / 1_000, "retry.maxDelayMs", report);
    if r.max_delay_ms < r.unit_ms {
        report.warn("retry.maxDelayMs", "maxDelayMs is below unitMs; every delay is capped");
    }
}

fn validate_queue(config: &LeadflowConfig, report: &mut ValidationReport) {
    let q = &config.queue;
    if q.batch_size == 0 {
        report.error("queue.batchSize", "batchSize must be >= 1");
    }
    if q.max_primary_size == 0 || q.max_retry_size == 0 {
        report.error("queue", "queue size caps must be >= 1");
    }
    if q.retry_interval_secs == 0 {
        report.error("queue.retryIntervalSecs", "retryIntervalSecs must be >= 1");
    }
    if q.metrics_interval_secs == 0 {
        report.error("queue.metricsIntervalSecs", "metricsIntervalSecs must be >= 1");
    }
    check_interval(q.retry_base_delay_secs, "queue.retryBaseDelaySecs", report);
    check_interval(q.retry_interval_secs, "queue.retryIntervalSecs", report);
    check_interval(q.metrics_interval_secs, "queue.metricsIntervalSecs", report);
    check_interval(q.batch_delay_ms / 1_000, "queue.batchDelayMs", report);
    check_cron(&q.primary_cron, "queue.primaryCron", report);

    if config.batch.chunk_size == 0 {
        report.error("batch.chunkSize", "chunkSize must be >= 1");
    }
    check_cron(&config.batch.flush_cron, "batch.flushCron", report);
}

fn validate_gateway(config: &LeadflowConfig, report: &mut ValidationReport) {
    let g = &config.gateway;
    if g.kind == GatewayKind::Webhook {
        match g.webhook_url.as_deref() {
            None | Some("") => {
                report.error("gateway.webhookUrl", "webhookUrl is required for the webhook gateway")
            }
            Some(url) if !is_http_url(url) => {
                report.error("gateway.webhookUrl", "webhookUrl must start with http:// or https://")
            }
            Some(_) => {}
        }
    }
    if let Some(url) = g.fallback_webhook_url.as_deref() {
        if !is_http_url(url) {
            report.error(
                "gateway.fallbackWebhookUrl",
                "fallbackWebhookUrl must start with http:// or https://",
            );
        }
    }
    if g.rate_per_minute == 0 {
        report.error("gateway.ratePerMinute", "ratePerMinute must be >= 1");
    }
    if g.max_in_flight == 0 {
        report.error("gateway.maxInFlight", "maxInFlight must be >= 1");
    }
}

fn validate_server(config: &LeadflowConfig, report: &mut ValidationReport) {
    let port = config.server.port;
    if port < 1024 && port != 80 && port != 443 {
        report.warn(
            "server.port",
            format!("Port {port} requires elevated privileges; consider using a port >= 1024"),
        );
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Structural check of a 5-field cron expression. Field semantics are
/// checked later by the scheduler's parser.
fn check_cron(expr: &str, path: &str, report: &mut ValidationReport) {
    let fields = expr.split_whitespace().count();
    if fields != 5 {
        report.error(path, format!("expected 5 cron fields, got {fields} in '{expr}'"));
    }
}

fn check_interval(secs: u64, path: &str, report: &mut ValidationReport) {
    if secs > MAX_INTERVAL_SECS {
        report.error(path, format!("must not exceed {MAX_INTERVAL_SECS} seconds"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let report = validate(&LeadflowConfig::default());
        assert!(report.is_valid(), "{}", report.summary());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut config = LeadflowConfig::default();
        config.priority.weights.recency = 0.5;
        let report = validate(&config);
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.path == "priority.weights"));
    }

    #[test]
    fn inverted_business_window_rejected() {
        let mut config = LeadflowConfig::default();
        config.business_hours.start_hour = 18;
        config.business_hours.end_hour = 9;
        assert!(!validate(&config).is_valid());
    }

    #[test]
    fn unknown_weekday_rejected() {
        let mut config = LeadflowConfig::default();
        config.business_hours.weekdays = vec!["mon".into(), "funday".into()];
        let report = validate(&config);
        assert!(report.summary().contains("funday"));
    }

    #[test]
    fn oversized_intervals_rejected() {
        let mut config = LeadflowConfig::default();
        config.followup.throttle_seconds = 10_000_000_000_000_000;
        config.queue.retry_base_delay_secs = u64::MAX;
        config.priority.engagement_window_days = i64::MAX;
        let report = validate(&config);
        for path in [
            "followup.throttleSeconds",
            "queue.retryBaseDelaySecs",
            "priority.engagementWindowDays",
        ] {
            assert!(report.errors.iter().any(|e| e.path == path), "{path} not rejected");
        }
    }

    #[test]
    fn webhook_gateway_needs_url() {
        let mut config = LeadflowConfig::default();
        config.gateway.kind = GatewayKind::Webhook;
        assert!(!validate(&config).is_valid());
        config.gateway.webhook_url = Some("https://sms.example.com/send".into());
        assert!(validate(&config).is_valid());
    }

    #[test]
    fn six_field_cron_rejected() {
        let mut config = LeadflowConfig::default();
        config.batch.flush_cron = "0 45 9-16 * * Mon-Fri".into();
        assert!(!validate(&config).is_valid());
    }
}
