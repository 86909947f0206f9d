//! Structured Logger
//!
//! Wraps `tracing` to provide console output, a daily rolling file
//! (NDJSON when `json` is set), and environment-based level control.

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global logger. `RUST_LOG` wins over `level` when set.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logger<P: AsRef<Path>>(log_dir: P, level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // logs/leadflow.log.YYYY-MM-DD
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "leadflow.log");

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_ansi(true);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    let _ = if json {
        registry
            .with(fmt::layer().json().with_writer(file_appender).with_ansi(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(file_appender).with_ansi(false))
            .try_init()
    };
}
