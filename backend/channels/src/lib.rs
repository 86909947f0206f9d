use std::sync::Arc;
use std::time::Duration;

use leadflow_config::{GatewayConfig, GatewayKind};
use leadflow_core::DeliveryGateway;

pub mod fallback;
pub mod log_gateway;
pub mod rate_limiter;
pub mod webhook;

pub use fallback::FallbackGateway;
pub use log_gateway::LogGateway;
pub use rate_limiter::{
    GatewayRateLimiter, RateLimitPolicy, RateLimitResult, RateLimitedGateway, SendPermit,
};
pub use webhook::{WebhookConfig, WebhookGateway};

/// Build the outbound gateway stack from config:
/// base transport, optional fallback, then the shared rate limiter.
pub fn build_gateway(cfg: &GatewayConfig) -> anyhow::Result<Arc<dyn DeliveryGateway>> {
    let timeout = Duration::from_secs(cfg.timeout_secs.max(1));

    let primary: Arc<dyn DeliveryGateway> = match cfg.kind {
        GatewayKind::Log => Arc::new(LogGateway),
        GatewayKind::Webhook => {
            let url = cfg
                .webhook_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("gateway.webhookUrl is required for kind 'webhook'"))?;
            Arc::new(WebhookGateway::new(WebhookConfig {
                name: "webhook".into(),
                url,
                timeout,
            })?)
        }
    };

    let base: Arc<dyn DeliveryGateway> = match &cfg.fallback_webhook_url {
        Some(url) => {
            let secondary = Arc::new(WebhookGateway::new(WebhookConfig {
                name: "fallback".into(),
                url: url.clone(),
                timeout,
            })?);
            Arc::new(FallbackGateway::new(primary, secondary))
        }
        None => primary,
    };

    let limiter = Arc::new(GatewayRateLimiter::new(RateLimitPolicy {
        max_messages: cfg.rate_per_minute.max(1),
        window: Duration::from_secs(60),
        max_in_flight: cfg.max_in_flight.max(1),
    }));

    // Fallback sends happen under the same permit as the primary.
    Ok(Arc::new(RateLimitedGateway::new(base, limiter, timeout * 2)))
}
