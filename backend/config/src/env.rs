//! Environment handling for config values.
//!
//! Two mechanisms run at load time:
//! - `${VAR_NAME}` references inside string values are substituted
//!   (uppercase `[A-Z_][A-Z0-9_]*` names only; `$${VAR}` stays literal).
//! - Well-known variables such as `FOLLOWUP_MIN_SCORE` override typed fields.

use crate::schema::LeadflowConfig;
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, warn};

#[allow(clippy::unwrap_used)]
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute `${VAR}` references using the process environment.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    substitute_value(value, &std::env::vars().collect(), "")
}

/// Substitute `${VAR}` references using a provided map.
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    substitute_value(value, env, "")
}

fn substitute_value(value: &Value, env: &HashMap<String, String>, path: &str) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let child = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                out.insert(k.clone(), substitute_value(v, env, &child)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(s: &str, env: &HashMap<String, String>, path: &str) -> Result<String> {
    if !s.contains('$') {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let substituted = ENV_VAR_PATTERN.replace_all(s, |caps: &regex::Captures| {
        let whole = &caps[0];
        let name = &caps[1];
        if whole.starts_with("$$") {
            return format!("${{{name}}}");
        }
        match env.get(name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                if missing.is_none() {
                    missing = Some(MissingEnvVarError {
                        var_name: name.to_string(),
                        config_path: path.to_string(),
                    });
                }
                String::new()
            }
        }
    });

    if let Some(err) = missing {
        bail!(err);
    }
    Ok(substituted.into_owned())
}

/// Collect all env var names referenced in a value tree.
pub fn collect_referenced_vars(value: &Value) -> Vec<String> {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => {
                for caps in ENV_VAR_PATTERN.captures_iter(s) {
                    if !caps[0].starts_with("$$") {
                        out.push(caps[1].to_string());
                    }
                }
            }
            Value::Array(arr) => arr.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            _ => {}
        }
    }
    let mut vars = Vec::new();
    walk(value, &mut vars);
    vars.sort();
    vars.dedup();
    vars
}

// ---------------------------------------------------------------------------
// Typed overrides
// ---------------------------------------------------------------------------

/// Apply `FOLLOWUP_*` and related overrides from the process environment.
pub fn apply_env_overrides(config: LeadflowConfig) -> LeadflowConfig {
    apply_env_overrides_with(config, &std::env::vars().collect())
}

/// Apply overrides from a provided map. Unparseable values are ignored with a warning.
pub fn apply_env_overrides_with(
    mut config: LeadflowConfig,
    env: &HashMap<String, String>,
) -> LeadflowConfig {
    override_from(env, "FOLLOWUP_THROTTLE_SECONDS", &mut config.followup.throttle_seconds);
    override_from(env, "FOLLOWUP_MIN_SCORE", &mut config.followup.min_score);
    override_from(env, "FOLLOWUP_START_HOUR", &mut config.business_hours.start_hour);
    override_from(env, "FOLLOWUP_END_HOUR", &mut config.business_hours.end_hour);
    override_from(env, "FOLLOWUP_MAX_RETRIES", &mut config.retry.max_retries);
    override_from(env, "FOLLOWUP_QUEUE_ALERT_THRESHOLD", &mut config.queue.alert_threshold);
    override_from(env, "BATCH_CHUNK_SIZE", &mut config.batch.chunk_size);
    override_from(env, "EMAIL_BATCH_SIZE", &mut config.queue.batch_size);
    override_from(env, "EMAIL_BATCH_DELAY", &mut config.queue.batch_delay_ms);
    override_from(env, "RATE_LIMIT_PER_MINUTE", &mut config.gateway.rate_per_minute);
    override_from(env, "DEFAULT_AREA_CODE", &mut config.business_hours.default_area_code);
    override_from(env, "LEADFLOW_DB", &mut config.storage.db_path);
    override_from(env, "LEADFLOW_PORT", &mut config.server.port);
    config
}

fn override_from<T: FromStr>(env: &HashMap<String, String>, key: &str, slot: &mut T) {
    let Some(raw) = env.get(key) else { return };
    let raw = raw.trim();
    if raw.is_empty() {
        return;
    }
    match raw.parse::<T>() {
        Ok(v) => {
            debug!(key, "Config override from environment");
            *slot = v;
        }
        Err(_) => warn!(key, value = raw, "Ignoring unparseable environment override"),
    }
}
