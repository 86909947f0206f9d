use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport a recipient address belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub channel: Channel,
    pub address: String,
}

/// Channel-independent message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePayload {
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
}

/// A pending delivery attempt.
///
/// Created once a lead clears the throttle and priority gates. The retry
/// counter is only advanced by the delivery queue when an attempt fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryTask {
    pub task_id: Uuid,
    pub lead_id: String,
    pub recipient: Recipient,
    /// Second-channel address (e-mail when the primary is SMS).
    #[serde(default)]
    pub alternate: Option<Recipient>,
    pub payload: MessagePayload,
    /// Lead phone number, used to resolve the local business-hours zone.
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub sheet_row: Option<u32>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    /// Caller-supplied token; one logical follow-up per key.
    pub idempotency_key: String,
    /// Outside business hours a schedulable task is queued instead of sent.
    #[serde(default = "default_true")]
    pub schedulable: bool,
    /// Earliest time the retry drain may pick this task up.
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl DeliveryTask {
    pub fn new(
        lead_id: impl Into<String>,
        recipient: Recipient,
        payload: MessagePayload,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            lead_id: lead_id.into(),
            recipient,
            alternate: None,
            payload,
            phone: None,
            sheet_row: None,
            retry_count: 0,
            created_at: Utc::now(),
            idempotency_key: idempotency_key.into(),
            schedulable: true,
            not_before: None,
        }
    }

    pub fn with_phone(mut self, phone: Option<String>) -> Self {
        self.phone = phone;
        self
    }

    pub fn with_alternate(mut self, alternate: Option<Recipient>) -> Self {
        self.alternate = alternate;
        self
    }

    /// The same task addressed to its alternate recipient, if it has one.
    pub fn for_alternate(&self) -> Option<Self> {
        let alternate = self.alternate.clone()?;
        let mut task = self.clone();
        task.recipient = alternate;
        task.alternate = None;
        Some(task)
    }

    pub fn with_sheet_row(mut self, row: Option<u32>) -> Self {
        self.sheet_row = row;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.schedulable = false;
        self
    }
}

/// A pending spreadsheet cell update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchWriteItem {
    pub row: u32,
    pub field: String,
    pub value: String,
}

impl BatchWriteItem {
    pub fn new(row: u32, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            row,
            field: field.into(),
            value: value.into(),
        }
    }
}
