//! `leadflow-config`: runtime configuration for the follow-up engine.
//!
//! Provides:
//! - Typed config schema with per-section defaults
//! - YAML read/write
//! - `${ENV_VAR}` substitution and `FOLLOWUP_*` overrides
//! - Validation with fatal errors and logged warnings

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use env::{
    apply_env_overrides, apply_env_overrides_with, collect_referenced_vars, resolve_env_vars,
    resolve_env_vars_with, MissingEnvVarError,
};
pub use io::{config_dir, config_file_path, load_config, parse_config, write_config};
pub use schema::{
    BatchConfig, BusinessHoursConfig, FollowupConfig, GatewayConfig, GatewayKind, LeadflowConfig,
    LoggingConfig, PriorityConfig, PriorityWeights, QueueConfig, RetryConfig, ServerConfig,
    StorageConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

/// Load a config file, substitute `${VAR}` references, apply environment
/// overrides, and validate. Any validation error aborts the load.
pub async fn load_and_prepare(path: &Path) -> Result<LeadflowConfig> {
    let raw_config = load_config(path).await?;
    prepare(raw_config)
}

/// The in-memory half of [`load_and_prepare`].
pub fn prepare(raw_config: LeadflowConfig) -> Result<LeadflowConfig> {
    let value: Value =
        serde_json::to_value(&raw_config).context("Failed to serialize config for processing")?;
    let value = resolve_env_vars(&value).context("Failed to resolve env vars in config")?;
    let config: LeadflowConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;
    let config = apply_env_overrides(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if !report.is_valid() {
        bail!("invalid configuration: {}", report.summary());
    }
    Ok(config)
}
