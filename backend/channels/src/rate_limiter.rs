//! Gateway rate limiter: a counting semaphore bounding in-flight sends plus
//! a fixed per-window quota, shared by every concurrent dispatch.

use async_trait::async_trait;
use leadflow_core::{DeliveryGateway, DeliveryTask, LeadflowError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Rate limit policy for an outbound gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicy {
    /// Max sends started per window.
    pub max_messages: u32,
    /// Window duration.
    pub window: Duration,
    /// Max sends awaiting a gateway response at once.
    pub max_in_flight: usize,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_messages: 60,
            window: Duration::from_secs(60),
            max_in_flight: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Time until the current window resets.
    pub reset_in: Duration,
    /// Remaining quota in this window.
    pub remaining: u32,
}

struct WindowState {
    count: u32,
    window_start: Instant,
}

pub struct GatewayRateLimiter {
    policy: RateLimitPolicy,
    in_flight: Arc<Semaphore>,
    window: Mutex<WindowState>,
}

/// Held for the duration of one send.
pub struct SendPermit {
    _permit: OwnedSemaphorePermit,
}

impl GatewayRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        let in_flight = Arc::new(Semaphore::new(policy.max_in_flight.max(1)));
        Self {
            policy,
            in_flight,
            window: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// Take one unit of the window quota if available. Never blocks.
    pub async fn check(&self) -> RateLimitResult {
        let mut state = self.window.lock().await;
        let now = Instant::now();

        if now.duration_since(state.window_start) >= self.policy.window {
            state.count = 0;
            state.window_start = now;
        }

        let reset_in = self
            .policy
            .window
            .saturating_sub(now.duration_since(state.window_start));

        if state.count < self.policy.max_messages {
            state.count += 1;
            let remaining = self.policy.max_messages - state.count;
            debug!(count = state.count, remaining, "Gateway rate check: allowed");
            RateLimitResult {
                allowed: true,
                reset_in,
                remaining,
            }
        } else {
            debug!(count = state.count, "Gateway rate check: denied");
            RateLimitResult {
                allowed: false,
                reset_in,
                remaining: 0,
            }
        }
    }

    /// Wait for an in-flight slot and a unit of window quota.
    pub async fn acquire(&self) -> Result<SendPermit> {
        let permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LeadflowError::RateLimited("gateway limiter closed".into()))?;
        loop {
            let result = self.check().await;
            if result.allowed {
                return Ok(SendPermit { _permit: permit });
            }
            tokio::time::sleep(result.reset_in.max(Duration::from_millis(5))).await;
        }
    }
}

/// Decorates a gateway with the shared limiter and a per-send timeout.
pub struct RateLimitedGateway {
    inner: Arc<dyn DeliveryGateway>,
    limiter: Arc<GatewayRateLimiter>,
    timeout: Duration,
}

impl RateLimitedGateway {
    pub fn new(
        inner: Arc<dyn DeliveryGateway>,
        limiter: Arc<GatewayRateLimiter>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner,
            limiter,
            timeout,
        }
    }
}

#[async_trait]
impl DeliveryGateway for RateLimitedGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, task: &DeliveryTask) -> Result<String> {
        let _permit = self.limiter.acquire().await?;
        match tokio::time::timeout(self.timeout, self.inner.send(task)).await {
            Ok(result) => result,
            Err(_) => Err(LeadflowError::Timeout(format!(
                "{} did not answer within {:?}",
                self.inner.name(),
                self.timeout
            ))),
        }
    }
}
