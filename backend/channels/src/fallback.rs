//! Primary → secondary channel fallback (e.g. SMS first, then e-mail).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use leadflow_core::{DeliveryGateway, DeliveryTask, LeadflowError, Result};

pub struct FallbackGateway {
    name: String,
    primary: Arc<dyn DeliveryGateway>,
    secondary: Arc<dyn DeliveryGateway>,
}

impl FallbackGateway {
    pub fn new(primary: Arc<dyn DeliveryGateway>, secondary: Arc<dyn DeliveryGateway>) -> Self {
        let name = format!("{}+{}", primary.name(), secondary.name());
        Self {
            name,
            primary,
            secondary,
        }
    }
}

#[async_trait]
impl DeliveryGateway for FallbackGateway {
    fn name(&self) -> &str {
        &self.name
    }

    /// The secondary gets the task readdressed to its alternate recipient
    /// when one exists. If both fail, the result is retryable when either
    /// failure was.
    async fn send(&self, task: &DeliveryTask) -> Result<String> {
        let primary_err = match self.primary.send(task).await {
            Ok(id) => return Ok(id),
            Err(e) => e,
        };
        warn!(
            lead_id = %task.lead_id,
            primary = %self.primary.name(),
            secondary = %self.secondary.name(),
            error = %primary_err,
            "Primary channel failed, trying secondary"
        );

        let secondary_task = task.for_alternate();
        let secondary_err = match self
            .secondary
            .send(secondary_task.as_ref().unwrap_or(task))
            .await
        {
            Ok(id) => return Ok(id),
            Err(e) => e,
        };

        Err(LeadflowError::Gateway {
            gateway: self.name.clone(),
            message: format!("primary: {primary_err}; secondary: {secondary_err}"),
            retryable: primary_err.is_retryable() || secondary_err.is_retryable(),
        })
    }
}
