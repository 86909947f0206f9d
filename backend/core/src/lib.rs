pub mod error;
pub mod task;
pub mod traits;
pub mod types;

pub use error::{LeadflowError, Result};
pub use task::{BatchWriteItem, Channel, DeliveryTask, MessagePayload, Recipient};
pub use traits::{DeliveryGateway, LeadStore, MessageComposer, SpreadsheetAdapter, WriteQueue};
pub use types::{
    ConversationMessage, Direction, Lead, NewConversation, PriorityFactors, PriorityScore,
};
