/// Log-only gateway for dry runs: every send succeeds and is written to the
/// log with the recipient redacted.
use async_trait::async_trait;
use leadflow_core::{DeliveryGateway, DeliveryTask, Result};
use leadflow_logging::redact_sensitive_data;
use tracing::info;

#[derive(Debug, Default)]
pub struct LogGateway;

#[async_trait]
impl DeliveryGateway for LogGateway {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, task: &DeliveryTask) -> Result<String> {
        info!(
            lead_id = %task.lead_id,
            channel = ?task.recipient.channel,
            to = %redact_sensitive_data(&task.recipient.address),
            chars = task.payload.body.chars().count(),
            "[dry-run] Follow-up not sent"
        );
        Ok(format!("log-{}", task.task_id))
    }
}
