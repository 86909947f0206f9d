/// Webhook gateway: POSTs each delivery task as JSON to an HTTP endpoint
/// (an SMS/e-mail relay) and reads the provider delivery id from the reply.
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use leadflow_core::{Channel, DeliveryGateway, DeliveryTask, LeadflowError, Result};

pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    pub timeout: Duration,
}

pub struct WebhookGateway {
    config: WebhookConfig,
    http: Client,
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    task_id: String,
    lead_id: &'a str,
    idempotency_key: &'a str,
    channel: Channel,
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    body: &'a str,
}

#[derive(Deserialize)]
struct ProviderReply {
    #[serde(alias = "delivery_id", alias = "messageId")]
    id: Option<String>,
}

impl WebhookGateway {
    pub fn new(config: WebhookConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }
}

/// Map an HTTP status to the error taxonomy. 429 and 5xx are worth retrying;
/// any other 4xx means the request itself is wrong.
pub fn classify_status(gateway: &str, status: StatusCode, body: &str) -> LeadflowError {
    let message = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS {
        LeadflowError::RateLimited(format!("{gateway}: {message}"))
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        LeadflowError::transient_gateway(gateway, message)
    } else {
        LeadflowError::permanent_gateway(gateway, message)
    }
}

#[async_trait]
impl DeliveryGateway for WebhookGateway {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn send(&self, task: &DeliveryTask) -> Result<String> {
        let message = OutboundMessage {
            task_id: task.task_id.to_string(),
            lead_id: &task.lead_id,
            idempotency_key: &task.idempotency_key,
            channel: task.recipient.channel,
            to: &task.recipient.address,
            subject: task.payload.subject.as_deref(),
            body: &task.payload.body,
        };

        let response = self
            .http
            .post(&self.config.url)
            .header("Idempotency-Key", &task.idempotency_key)
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LeadflowError::Timeout(format!("{}: {e}", self.config.name))
                } else {
                    LeadflowError::transient_gateway(&self.config.name, e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(&self.config.name, status, &body));
        }

        let id = serde_json::from_str::<ProviderReply>(&body)
            .ok()
            .and_then(|r| r.id)
            .unwrap_or_else(|| task.task_id.to_string());
        debug!(gateway = %self.config.name, lead_id = %task.lead_id, delivery_id = %id, "Webhook accepted message");
        Ok(id)
    }
}
