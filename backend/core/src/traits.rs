use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::task::{BatchWriteItem, DeliveryTask};
use crate::types::{ConversationMessage, Lead, NewConversation, PriorityScore};

/// The lead and conversation data store. Every call is I/O and may fail.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// All leads currently eligible for evaluation.
    async fn fetch_active_leads(&self) -> Result<Vec<Lead>>;

    /// Most recent conversation messages for a lead, newest first.
    async fn fetch_recent_conversations(
        &self,
        lead_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>>;

    async fn update_lead(&self, lead_id: &str, fields: &Map<String, Value>) -> Result<()>;

    async fn insert_conversation(&self, conversation: &NewConversation) -> Result<()>;

    async fn mark_followup_sent(&self, lead_id: &str, idempotency_key: &str) -> Result<()>;
}

/// Produces the text of a follow-up message.
#[async_trait]
pub trait MessageComposer: Send + Sync {
    async fn compose(
        &self,
        lead: &Lead,
        context: &[ConversationMessage],
        score: &PriorityScore,
    ) -> Result<String>;
}

/// An outbound transport (SMS, e-mail, webhook).
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    /// Provider name (e.g., "webhook", "log").
    fn name(&self) -> &str;

    /// Deliver a task and return the provider's delivery id.
    async fn send(&self, task: &DeliveryTask) -> Result<String>;
}

/// Spreadsheet mirror of the lead list.
#[async_trait]
pub trait SpreadsheetAdapter: Send + Sync {
    async fn read_rows(&self, range: &str) -> Result<Vec<Vec<String>>>;

    /// Apply a chunk of cell updates. Returns the number of cells written.
    async fn write_cells(&self, chunk: &[BatchWriteItem]) -> Result<usize>;
}

/// Durable FIFO of pending cell updates.
///
/// `pop_batch` must be atomic: an item is handed to at most one caller.
#[async_trait]
pub trait WriteQueue: Send + Sync {
    async fn push(&self, item: &BatchWriteItem) -> Result<()>;

    async fn pop_batch(&self, max: usize) -> Result<Vec<BatchWriteItem>>;

    async fn len(&self) -> Result<usize>;
}
