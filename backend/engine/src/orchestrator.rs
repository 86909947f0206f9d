//! Follow-up cycle.
//!
//! One cycle fetches every active lead and runs each through its own
//! pipeline (history, throttle, score, compose, dispatch) concurrently, with
//! a bounded fan-out. Only the initial lead fetch can fail the cycle; every
//! per-lead failure is caught, logged and counted in the [`CycleSummary`].

use chrono::{DateTime, Utc};
use leadflow_config::LeadflowConfig;
use leadflow_core::{
    Channel, DeliveryTask, Lead, LeadStore, LeadflowError, MessageComposer, MessagePayload,
    PriorityScore, Recipient, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::business_hours::BusinessHoursGate;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::priority::PriorityScorer;
use crate::throttle::{last_contact, ThrottleGuard};

const EMAIL_SUBJECT: &str = "Following up";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub min_score: f64,
    pub history_limit: usize,
    pub max_concurrency: usize,
}

impl From<&LeadflowConfig> for OrchestratorSettings {
    fn from(cfg: &LeadflowConfig) -> Self {
        Self {
            min_score: cfg.followup.min_score,
            history_limit: cfg.followup.history_limit,
            max_concurrency: cfg.followup.max_concurrency,
        }
    }
}

/// Per-lead failures by class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCounts {
    pub history: usize,
    pub compose: usize,
    pub delivery: usize,
    pub no_channel: usize,
    pub panicked: usize,
}

impl FailureCounts {
    pub fn total(&self) -> usize {
        self.history + self.compose + self.delivery + self.no_channel + self.panicked
    }
}

/// Result of one cycle. Emitted once, logged, and returned to the trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidates: usize,
    pub throttled: usize,
    pub below_threshold: usize,
    /// Leads handed to the dispatcher.
    pub dispatched: usize,
    pub sent: usize,
    pub queued: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub failures: FailureCounts,
    /// Leads scored with the neutral fallback.
    pub scoring_fallbacks: usize,
}

impl CycleSummary {
    fn new(started_at: DateTime<Utc>, candidates: usize) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            candidates,
            throttled: 0,
            below_threshold: 0,
            dispatched: 0,
            sent: 0,
            queued: 0,
            duplicates: 0,
            failed: 0,
            failures: FailureCounts::default(),
            scoring_fallbacks: 0,
        }
    }

    fn absorb(&mut self, result: LeadResult) {
        if result.scoring_fallback {
            self.scoring_fallbacks += 1;
        }
        match result.stage {
            LeadStage::HistoryFailed => self.failures.history += 1,
            LeadStage::Throttled => self.throttled += 1,
            LeadStage::BelowThreshold => self.below_threshold += 1,
            LeadStage::NoChannel => self.failures.no_channel += 1,
            LeadStage::ComposeFailed => self.failures.compose += 1,
            LeadStage::Dispatched(outcome) => {
                self.dispatched += 1;
                match outcome {
                    DispatchOutcome::Sent { .. } => self.sent += 1,
                    DispatchOutcome::Queued => self.queued += 1,
                    DispatchOutcome::Duplicate => self.duplicates += 1,
                    DispatchOutcome::Failed { .. } => self.failures.delivery += 1,
                }
            }
        }
    }
}

/// Where a lead's pipeline stopped.
#[derive(Debug)]
enum LeadStage {
    HistoryFailed,
    Throttled,
    BelowThreshold,
    NoChannel,
    ComposeFailed,
    Dispatched(DispatchOutcome),
}

#[derive(Debug)]
struct LeadResult {
    stage: LeadStage,
    scoring_fallback: bool,
}

impl From<LeadStage> for LeadResult {
    fn from(stage: LeadStage) -> Self {
        Self {
            stage,
            scoring_fallback: false,
        }
    }
}

pub struct FollowupOrchestrator {
    store: Arc<dyn LeadStore>,
    composer: Arc<dyn MessageComposer>,
    scorer: PriorityScorer,
    throttle: ThrottleGuard,
    gate: Arc<BusinessHoursGate>,
    dispatcher: Arc<Dispatcher>,
    settings: OrchestratorSettings,
}

impl FollowupOrchestrator {
    pub fn new(
        store: Arc<dyn LeadStore>,
        composer: Arc<dyn MessageComposer>,
        scorer: PriorityScorer,
        throttle: ThrottleGuard,
        gate: Arc<BusinessHoursGate>,
        dispatcher: Arc<Dispatcher>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            composer,
            scorer,
            throttle,
            gate,
            dispatcher,
            settings,
        }
    }

    /// Run one cycle. Fails only if the active leads cannot be fetched.
    pub async fn run_cycle(self: &Arc<Self>, now: DateTime<Utc>) -> Result<CycleSummary> {
        let leads = self.store.fetch_active_leads().await.map_err(|e| match e {
            LeadflowError::LeadSource(_) => e,
            other => LeadflowError::LeadSource(other.to_string()),
        })?;
        let leads: Vec<Lead> = leads.into_iter().filter(Lead::is_active).collect();

        let mut summary = CycleSummary::new(now, leads.len());
        info!(cycle_id = %summary.cycle_id, candidates = leads.len(), "Follow-up cycle started");

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for lead in leads {
            let this = Arc::clone(self);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                this.process_lead(lead, now).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => summary.absorb(result),
                Err(e) => {
                    error!(cycle_id = %summary.cycle_id, error = %e, "Lead pipeline panicked");
                    summary.failures.panicked += 1;
                }
            }
        }

        summary.failed = summary.failures.total();
        summary.finished_at = Utc::now().max(now);
        info!(
            cycle_id = %summary.cycle_id,
            candidates = summary.candidates,
            throttled = summary.throttled,
            below_threshold = summary.below_threshold,
            dispatched = summary.dispatched,
            sent = summary.sent,
            queued = summary.queued,
            duplicates = summary.duplicates,
            failed = summary.failed,
            scoring_fallbacks = summary.scoring_fallbacks,
            "Follow-up cycle finished"
        );
        Ok(summary)
    }

    /// One lead, strictly in order: history, throttle, score, compose, dispatch.
    async fn process_lead(&self, lead: Lead, now: DateTime<Utc>) -> LeadResult {
        let history = match self
            .store
            .fetch_recent_conversations(&lead.id, self.settings.history_limit)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(lead_id = %lead.id, error = %e, "History fetch failed, skipping lead this cycle");
                return LeadStage::HistoryFailed.into();
            }
        };

        if !self
            .throttle
            .eligible(&lead.id, last_contact(&lead, &history), now)
        {
            return LeadStage::Throttled.into();
        }

        let (score, scoring_fallback) = match self.scorer.try_score(&lead, &history, now) {
            Ok(score) => (score, false),
            Err(e) => {
                warn!(lead_id = %lead.id, error = %e, "Scoring failed, using neutral score");
                (PriorityScore::neutral(), true)
            }
        };
        let result = |stage| LeadResult {
            stage,
            scoring_fallback,
        };

        if score.score < self.settings.min_score {
            debug!(lead_id = %lead.id, score = score.score, "Below minimum score");
            return result(LeadStage::BelowThreshold);
        }

        let Some((recipient, alternate)) = recipients(&lead) else {
            warn!(lead_id = %lead.id, "Lead has no phone or e-mail");
            return result(LeadStage::NoChannel);
        };

        let body = match self.composer.compose(&lead, &history, &score).await {
            Ok(body) if !body.trim().is_empty() => body,
            Ok(_) => {
                warn!(lead_id = %lead.id, "Composer returned an empty message");
                return result(LeadStage::ComposeFailed);
            }
            Err(e) => {
                warn!(lead_id = %lead.id, error = %e, "Message composition failed");
                return result(LeadStage::ComposeFailed);
            }
        };

        let key = idempotency_key(&lead.id, &self.gate, lead.phone.as_deref(), now);
        let subject = (recipient.channel == Channel::Email).then(|| EMAIL_SUBJECT.to_string());
        let task = DeliveryTask::new(
            lead.id.clone(),
            recipient,
            MessagePayload { subject, body },
            key,
        )
        .with_phone(lead.phone.clone())
        .with_alternate(alternate)
        .with_sheet_row(lead.sheet_row);

        result(LeadStage::Dispatched(self.dispatcher.dispatch(task, now).await))
    }
}

/// One follow-up per lead per local calendar day.
pub fn idempotency_key(
    lead_id: &str,
    gate: &BusinessHoursGate,
    phone: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    format!("{lead_id}:{}", gate.local_date(phone, now))
}

/// SMS when the lead has a phone, with e-mail as the alternate; otherwise
/// e-mail alone.
fn recipients(lead: &Lead) -> Option<(Recipient, Option<Recipient>)> {
    let phone = lead.phone.as_deref().map(str::trim).filter(|p| !p.is_empty());
    let email = lead.email.as_deref().map(str::trim).filter(|e| e.contains('@'));
    let email = email.map(|address| Recipient {
        channel: Channel::Email,
        address: address.to_string(),
    });
    match phone {
        Some(number) => Some((
            Recipient {
                channel: Channel::Sms,
                address: number.to_string(),
            },
            email,
        )),
        None => email.map(|e| (e, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{DispatcherSettings, JOB_DELIVERY};
    use crate::queue::{DeliveryQueue, QueueSettings, Slot};
    use crate::status::DeliveryMetrics;
    use crate::testing::{
        fast_executor, lead_contacted_at, MemoryLeadStore, ScriptedGateway, StaticComposer,
    };
    use chrono::{Duration, TimeZone};
    use leadflow_config::PriorityConfig;
    use leadflow_core::{ConversationMessage, Direction};
    use leadflow_scheduler::RetryExecutor;

    struct Harness {
        orchestrator: Arc<FollowupOrchestrator>,
        gateway: Arc<ScriptedGateway>,
        queue: Arc<DeliveryQueue>,
        executor: RetryExecutor,
    }

    fn harness(
        store: MemoryLeadStore,
        composer: StaticComposer,
        gateway: ScriptedGateway,
        max_retries: u32,
    ) -> Harness {
        let store: Arc<MemoryLeadStore> = Arc::new(store);
        let gateway = Arc::new(gateway);
        let gate = Arc::new(BusinessHoursGate::always_open());
        let queue = Arc::new(DeliveryQueue::new(QueueSettings {
            max_retries: 3,
            retry_base_delay: Duration::seconds(60),
            max_primary_size: 1000,
            max_retry_size: 100,
        }));
        let executor = fast_executor(max_retries);
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            gateway.clone(),
            executor.clone(),
            gate.clone(),
            Arc::new(DeliveryMetrics::new()),
            store.clone(),
            None,
            DispatcherSettings {
                batch_size: 50,
                batch_delay: std::time::Duration::ZERO,
            },
        ));
        let orchestrator = Arc::new(FollowupOrchestrator::new(
            store,
            Arc::new(composer),
            PriorityScorer::new(&PriorityConfig::default()).unwrap(),
            ThrottleGuard::from_seconds(86_400),
            gate,
            dispatcher,
            OrchestratorSettings {
                min_score: 0.4,
                history_limit: 100,
                max_concurrency: 8,
            },
        ));
        Harness {
            orchestrator,
            gateway,
            queue,
            executor,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 15, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn hundred_leads_ten_never_contacted() {
        let two_hours_ago = now() - Duration::hours(2);
        let leads: Vec<Lead> = (0..100)
            .map(|i| {
                let contacted = if i < 10 { None } else { Some(two_hours_ago) };
                lead_contacted_at(&format!("L{i}"), "+1 212 555 0100", contacted)
            })
            .collect();
        let h = harness(
            MemoryLeadStore::new(leads),
            StaticComposer::new(),
            ScriptedGateway::new(),
            3,
        );

        let summary = h.orchestrator.run_cycle(now()).await.unwrap();
        assert_eq!(h.gateway.calls(), 10);
        assert_eq!(summary.candidates, 100);
        assert_eq!(summary.throttled, 90);
        assert_eq!(summary.dispatched, 10);
        assert_eq!(summary.sent, 10);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn send_failing_three_times_ends_sent() {
        let lead = lead_contacted_at("L1", "+1 212 555 0100", None);
        let h = harness(
            MemoryLeadStore::new(vec![lead]),
            StaticComposer::new(),
            ScriptedGateway::failing(3),
            5,
        );

        let summary = h.orchestrator.run_cycle(now()).await.unwrap();
        assert_eq!(summary.sent, 1);
        assert!(matches!(
            h.queue.slot_of("L1:2026-10-19").await,
            Some(Slot::Terminal { .. })
        ));
        let stats = h.executor.ledger().stats(JOB_DELIVERY).await;
        assert_eq!((stats.retries, stats.failures), (3, 0));
    }

    #[tokio::test]
    async fn recent_outbound_history_throttles_lead_without_timestamp() {
        let message = |lead_id: &str, direction, hours_ago| ConversationMessage {
            lead_id: lead_id.into(),
            direction,
            body: "hello".into(),
            timestamp: now() - Duration::hours(hours_ago),
        };
        let store = MemoryLeadStore::new(vec![
            lead_contacted_at("L1", "+12125550100", None),
            lead_contacted_at("L2", "+12125550100", None),
        ])
        .with_history("L1", vec![message("L1", Direction::Outbound, 2)])
        .with_history("L2", vec![message("L2", Direction::Inbound, 2)]);
        let h = harness(store, StaticComposer::new(), ScriptedGateway::new(), 3);

        let summary = h.orchestrator.run_cycle(now()).await.unwrap();
        assert_eq!(summary.throttled, 1);
        assert_eq!(summary.sent, 1);
        let delivered = h.gateway.delivered.lock().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].lead_id, "L2");
    }

    #[tokio::test]
    async fn lead_fetch_failure_aborts_cycle() {
        let store = MemoryLeadStore::new(vec![lead_contacted_at("L1", "+12125550100", None)]);
        store.fail_lead_fetch(true);
        let h = harness(store, StaticComposer::new(), ScriptedGateway::new(), 3);

        let err = h.orchestrator.run_cycle(now()).await.unwrap_err();
        assert!(matches!(err, LeadflowError::LeadSource(_)));
        assert_eq!(h.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn per_lead_failures_are_isolated_and_counted() {
        let mut no_channel = Lead::new("L4");
        no_channel.phone = None;
        let mut emailed = Lead::new("L5");
        emailed.email = Some("pat@example.com".into());
        let leads = vec![
            lead_contacted_at("L1", "+12125550100", None),
            lead_contacted_at("L2", "+12125550101", None),
            lead_contacted_at("L3", "+12125550102", None),
            no_channel,
            emailed,
        ];
        let store = MemoryLeadStore::new(leads).failing_history_for("L2");
        let composer = StaticComposer::new().failing_for("L3");
        let h = harness(store, composer, ScriptedGateway::new(), 3);

        let summary = h.orchestrator.run_cycle(now()).await.unwrap();
        assert_eq!(summary.failures.history, 1);
        assert_eq!(summary.failures.compose, 1);
        assert_eq!(summary.failures.no_channel, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.sent, 2);

        let delivered = h.gateway.delivered.lock().await;
        let email = delivered.iter().find(|t| t.lead_id == "L5").unwrap();
        assert_eq!(email.recipient.channel, Channel::Email);
        assert_eq!(email.payload.subject.as_deref(), Some(EMAIL_SUBJECT));
    }

    #[tokio::test]
    async fn second_cycle_same_day_is_duplicate() {
        let lead = lead_contacted_at("L1", "+12125550100", None);
        // The in-memory store never records the contact, so only the
        // idempotency key stops the second send.
        let h = harness(
            MemoryLeadStore::new(vec![lead]),
            StaticComposer::new(),
            ScriptedGateway::new(),
            3,
        );
        h.orchestrator.run_cycle(now()).await.unwrap();
        let second = h
            .orchestrator
            .run_cycle(now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(second.duplicates, 1);
        assert_eq!(h.gateway.calls(), 1);
    }

    #[tokio::test]
    async fn inactive_leads_are_not_candidates() {
        let mut closed = lead_contacted_at("L1", "+12125550100", None);
        closed.status = "closed".into();
        let h = harness(
            MemoryLeadStore::new(vec![closed]),
            StaticComposer::new(),
            ScriptedGateway::new(),
            3,
        );
        let summary = h.orchestrator.run_cycle(now()).await.unwrap();
        assert_eq!(summary.candidates, 0);
    }

    #[test]
    fn sms_preferred_with_email_alternate() {
        let mut lead = Lead::new("L1");
        lead.phone = Some(" +12125550100 ".into());
        lead.email = Some("a@b.co".into());
        let (primary, alternate) = recipients(&lead).unwrap();
        assert_eq!(primary.channel, Channel::Sms);
        assert_eq!(primary.address, "+12125550100");
        assert_eq!(alternate.unwrap().channel, Channel::Email);

        lead.phone = None;
        lead.email = Some("not-an-address".into());
        assert!(recipients(&lead).is_none());
    }
}
