//! Template message composer used when no generative composer is wired in.

use async_trait::async_trait;
use leadflow_core::{
    ConversationMessage, Direction, Lead, LeadflowError, MessageComposer, PriorityScore, Result,
};

const HIGH_PRIORITY: f64 = 0.75;

const FIRST_TOUCH: &str = "Hi {name}, thanks for your interest! When would be a good time for a quick call?";
const REPLY_PENDING: &str = "Hi {name}, following up on your last message. Happy to answer any questions.";
const HIGH_PRIORITY_TOUCH: &str = "Hi {name}, I have a few options that match what you're looking for. Can we talk today?";
const CHECK_IN: &str = "Hi {name}, just checking in. Is there anything I can help you with?";

#[derive(Debug, Default)]
pub struct TemplateComposer;

fn first_name(lead: &Lead) -> &str {
    lead.name
        .split_whitespace()
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("there")
}

#[async_trait]
impl MessageComposer for TemplateComposer {
    async fn compose(
        &self,
        lead: &Lead,
        context: &[ConversationMessage],
        score: &PriorityScore,
    ) -> Result<String> {
        // Context is newest first.
        let template = match context.first() {
            None => FIRST_TOUCH,
            Some(m) if m.direction == Direction::Inbound => REPLY_PENDING,
            Some(_) if score.score >= HIGH_PRIORITY => HIGH_PRIORITY_TOUCH,
            Some(_) => CHECK_IN,
        };
        let body = template.replace("{name}", first_name(lead));
        if body.trim().is_empty() {
            return Err(LeadflowError::Compose(format!("empty message for lead {}", lead.id)));
        }
        Ok(body)
    }
}
