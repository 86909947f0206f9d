use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A prospective customer as read from the lead store.
///
/// The engine only ever holds snapshots; writes go back through
/// [`crate::LeadStore`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Last outbound contact. `None` means never contacted.
    #[serde(default)]
    pub last_contact_at: Option<DateTime<Utc>>,
    #[serde(default = "default_status")]
    pub status: String,
    /// Row of this lead in the spreadsheet mirror, if it has one.
    #[serde(default)]
    pub sheet_row: Option<u32>,
    /// Free-form bag: source, assigned agent, classification, value indicators.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

fn default_status() -> String {
    "new".to_string()
}

impl Lead {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            phone: None,
            email: None,
            last_contact_at: None,
            status: default_status(),
            sheet_row: None,
            metadata: HashMap::new(),
        }
    }

    /// Metadata value as a lowercase string, if it is a string at all.
    pub fn meta_str(&self, key: &str) -> Option<String> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_lowercase())
    }

    /// Leads in a closed state are never candidates for follow-up.
    pub fn is_active(&self) -> bool {
        !matches!(
            self.status.to_lowercase().as_str(),
            "closed" | "won" | "lost" | "unsubscribed" | "do_not_contact"
        )
    }
}

/// Direction of a conversation message relative to us.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// One message of a lead's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub lead_id: String,
    pub direction: Direction,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// A conversation row the engine asks the store to insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversation {
    pub lead_id: String,
    pub direction: Direction,
    pub body: String,
    pub status: String,
    pub metadata: Value,
}

/// Per-evaluation sub-scores, each clamped to [0, 1]. Never persisted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PriorityFactors {
    pub recency: f64,
    pub engagement: f64,
    pub classification: f64,
    pub source: f64,
    pub interaction_frequency: f64,
    pub value: f64,
    pub time_since_contact: f64,
}

/// Final priority in [0, 1] plus the breakdown that produced it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriorityScore {
    pub score: f64,
    pub factors: PriorityFactors,
    /// Set when scoring failed and the neutral score was substituted.
    #[serde(default)]
    pub fallback: bool,
}

impl PriorityScore {
    pub const NEUTRAL: f64 = 0.5;

    pub fn neutral() -> Self {
        Self {
            score: Self::NEUTRAL,
            factors: PriorityFactors::default(),
            fallback: true,
        }
    }
}
