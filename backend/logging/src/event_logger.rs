//! Delivery Event Logger
//!
//! Lifecycle events for each delivery task, emitted on the `delivery_events`
//! tracing target so they can be filtered into their own stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::redact::redact_sensitive_data;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Queued {
        recipient: String,
    },
    Sent {
        gateway: String,
        receipt: String,
        attempts: u32,
    },
    Retrying {
        retry_count: u32,
        error: String,
    },
    Failed {
        error: String,
        attempts: u32,
    },
    /// Exhausted every retry; will not be attempted again.
    Dropped {
        reason: String,
    },
}

impl DeliveryEvent {
    pub fn is_failure(&self) -> bool {
        matches!(self, DeliveryEvent::Failed { .. } | DeliveryEvent::Dropped { .. })
    }
}

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub task_id: Uuid,
    pub lead_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: DeliveryEvent,
}

pub struct DeliveryEventLogger;

impl DeliveryEventLogger {
    /// Redact and emit one lifecycle event. Returns the entry that was logged.
    pub fn log_event(task_id: Uuid, lead_id: &str, mut event: DeliveryEvent) -> EventLogEntry {
        match &mut event {
            DeliveryEvent::Queued { recipient } => {
                *recipient = redact_sensitive_data(recipient);
            }
            DeliveryEvent::Sent { receipt, .. } => {
                *receipt = redact_sensitive_data(receipt);
            }
            DeliveryEvent::Retrying { error, .. } | DeliveryEvent::Failed { error, .. } => {
                *error = redact_sensitive_data(error);
            }
            DeliveryEvent::Dropped { reason } => {
                *reason = redact_sensitive_data(reason);
            }
        }

        let entry = EventLogEntry {
            task_id,
            lead_id: lead_id.to_string(),
            timestamp: Utc::now(),
            event,
        };

        let payload = serde_json::to_string(&entry).unwrap_or_default();
        if entry.event.is_failure() {
            warn!(target: "delivery_events", event = %payload, "Delivery event");
        } else {
            info!(target: "delivery_events", event = %payload, "Delivery event");
        }
        entry
    }
}
