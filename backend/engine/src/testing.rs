//! In-memory collaborators shared by the engine's unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_core::{
    BatchWriteItem, Channel, ConversationMessage, DeliveryGateway, DeliveryTask, Lead,
    LeadStore, LeadflowError, MessageComposer, MessagePayload, NewConversation, PriorityScore,
    Recipient, Result, SpreadsheetAdapter,
};
use leadflow_scheduler::{RetryExecutor, RetryLedger, RetryPolicy};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub fn task_for(lead_id: &str) -> DeliveryTask {
    DeliveryTask::new(
        lead_id,
        Recipient {
            channel: Channel::Sms,
            address: "+12125550100".into(),
        },
        MessagePayload {
            subject: None,
            body: format!("hello {lead_id}"),
        },
        format!("{lead_id}:2026-10-19"),
    )
}

/// Millisecond-scale retries so tests do not sleep for real backoff.
pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff_base: 2.0,
        unit_ms: 1,
        max_delay_ms: 5,
        jitter: false,
    }
}

pub fn fast_executor(max_retries: u32) -> RetryExecutor {
    RetryExecutor::new(fast_policy(max_retries), Arc::new(RetryLedger::new()))
}

// ---------------------------------------------------------------------------
// Lead store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryLeadStore {
    leads: Vec<Lead>,
    history: HashMap<String, Vec<ConversationMessage>>,
    fail_leads: AtomicBool,
    fail_history: HashSet<String>,
    pub inserted: Mutex<Vec<NewConversation>>,
    pub marked: Mutex<Vec<(String, String)>>,
    pub updates: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl MemoryLeadStore {
    pub fn new(leads: Vec<Lead>) -> Self {
        Self {
            leads,
            ..Default::default()
        }
    }

    pub fn with_history(mut self, lead_id: &str, messages: Vec<ConversationMessage>) -> Self {
        self.history.insert(lead_id.to_string(), messages);
        self
    }

    pub fn failing_history_for(mut self, lead_id: &str) -> Self {
        self.fail_history.insert(lead_id.to_string());
        self
    }

    pub fn fail_lead_fetch(&self, fail: bool) {
        self.fail_leads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn fetch_active_leads(&self) -> Result<Vec<Lead>> {
        if self.fail_leads.load(Ordering::SeqCst) {
            return Err(LeadflowError::LeadSource("store offline".into()));
        }
        Ok(self.leads.clone())
    }

    async fn fetch_recent_conversations(
        &self,
        lead_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        if self.fail_history.contains(lead_id) {
            return Err(LeadflowError::Store(format!("history unavailable for {lead_id}")));
        }
        let mut messages = self.history.get(lead_id).cloned().unwrap_or_default();
        messages.truncate(limit);
        Ok(messages)
    }

    async fn update_lead(&self, lead_id: &str, fields: &Map<String, Value>) -> Result<()> {
        self.updates
            .lock()
            .await
            .push((lead_id.to_string(), fields.clone()));
        Ok(())
    }

    async fn insert_conversation(&self, conversation: &NewConversation) -> Result<()> {
        self.inserted.lock().await.push(conversation.clone());
        Ok(())
    }

    async fn mark_followup_sent(&self, lead_id: &str, idempotency_key: &str) -> Result<()> {
        self.marked
            .lock()
            .await
            .push((lead_id.to_string(), idempotency_key.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Fails the first `failures` calls, then succeeds.
#[derive(Default)]
pub struct ScriptedGateway {
    failures_left: AtomicU32,
    reject: AtomicBool,
    calls: AtomicUsize,
    pub delivered: Mutex<Vec<DeliveryTask>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: u32) -> Self {
        let gw = Self::default();
        gw.failures_left.store(failures, Ordering::SeqCst);
        gw
    }

    pub fn rejecting() -> Self {
        let gw = Self::default();
        gw.reject.store(true, Ordering::SeqCst);
        gw
    }

    pub fn set_failures(&self, failures: u32) {
        self.failures_left.store(failures, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn delivered_count(&self) -> usize {
        self.delivered.lock().await.len()
    }
}

#[async_trait]
impl DeliveryGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, task: &DeliveryTask) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(LeadflowError::permanent_gateway("scripted", "invalid recipient"));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LeadflowError::transient_gateway("scripted", "503 service unavailable"));
        }
        self.delivered.lock().await.push(task.clone());
        Ok(format!("msg-{n}"))
    }
}

// ---------------------------------------------------------------------------
// Composer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StaticComposer {
    failing: HashSet<String>,
}

impl StaticComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, lead_id: &str) -> Self {
        self.failing.insert(lead_id.to_string());
        self
    }
}

#[async_trait]
impl MessageComposer for StaticComposer {
    async fn compose(
        &self,
        lead: &Lead,
        _context: &[ConversationMessage],
        _score: &PriorityScore,
    ) -> Result<String> {
        if self.failing.contains(&lead.id) {
            return Err(LeadflowError::Compose("model unavailable".into()));
        }
        Ok(format!("Hi {}, just checking in.", lead.name))
    }
}

// ---------------------------------------------------------------------------
// Spreadsheet
// ---------------------------------------------------------------------------

/// Records every successful `write_cells` chunk. Calls listed in
/// `fail_calls` (0-based, across all chunks) fail with a retryable error.
#[derive(Default)]
pub struct RecordingSheet {
    calls: AtomicUsize,
    failing_calls: Mutex<HashSet<usize>>,
    chunks: Mutex<Vec<Vec<BatchWriteItem>>>,
}

impl RecordingSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_calls(&self, calls: &[usize]) {
        self.failing_calls.lock().await.extend(calls.iter().copied());
    }

    pub async fn chunk_sizes(&self) -> Vec<usize> {
        self.chunks.lock().await.iter().map(Vec::len).collect()
    }

    pub async fn rows(&self) -> Vec<u32> {
        self.chunks
            .lock()
            .await
            .iter()
            .flatten()
            .map(|item| item.row)
            .collect()
    }
}

#[async_trait]
impl SpreadsheetAdapter for RecordingSheet {
    async fn read_rows(&self, _range: &str) -> Result<Vec<Vec<String>>> {
        Ok(self
            .chunks
            .lock()
            .await
            .iter()
            .flatten()
            .map(|item| vec![item.row.to_string(), item.field.clone(), item.value.clone()])
            .collect())
    }

    async fn write_cells(&self, chunk: &[BatchWriteItem]) -> Result<usize> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_calls.lock().await.contains(&call) {
            return Err(LeadflowError::Spreadsheet(format!("quota exceeded on call {call}")));
        }
        self.chunks.lock().await.push(chunk.to_vec());
        Ok(chunk.len())
    }
}

pub fn lead_contacted_at(id: &str, phone: &str, at: Option<DateTime<Utc>>) -> Lead {
    let mut lead = Lead::new(id);
    lead.name = format!("Lead {id}");
    lead.phone = Some(phone.to_string());
    lead.last_contact_at = at;
    lead
}
