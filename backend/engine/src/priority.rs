//! Lead priority scoring.
//!
//! A pure function of the lead snapshot, its supplied conversation history
//! and the evaluation time. Each sub-score is clamped to [0, 1] and the final
//! score is their weighted sum. Missing or malformed metadata always falls
//! into an explicit default bucket.

use chrono::{DateTime, Duration, Utc};
use leadflow_config::{PriorityConfig, PriorityWeights};
use leadflow_core::{
    ConversationMessage, Direction, Lead, LeadflowError, PriorityFactors, PriorityScore, Result,
};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

use crate::throttle::last_contact;

const SECONDS_PER_DAY: f64 = 86_400.0;
const DEFAULT_BUCKET: &str = "default";

#[derive(Debug, Clone)]
pub struct PriorityScorer {
    weights: PriorityWeights,
    half_life_days: f64,
    engagement_window: Duration,
    classification_scores: HashMap<String, f64>,
    source_scores: HashMap<String, f64>,
}

impl PriorityScorer {
    /// Weights are validated here, once, rather than on every call.
    pub fn new(cfg: &PriorityConfig) -> Result<Self> {
        let weights = cfg.weights.clone();
        if weights
            .as_array()
            .iter()
            .any(|w| !w.is_finite() || !(0.0..=1.0).contains(w))
        {
            return Err(LeadflowError::Config(
                "priority weights must each be within [0, 1]".into(),
            ));
        }
        let sum = weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(LeadflowError::Config(format!(
                "priority weights must sum to 1.0 (got {sum:.4})"
            )));
        }
        if !(cfg.half_life_days.is_finite() && cfg.half_life_days > 0.0) {
            return Err(LeadflowError::Config("halfLifeDays must be > 0".into()));
        }
        Ok(Self {
            weights,
            half_life_days: cfg.half_life_days,
            engagement_window: Duration::try_days(cfg.engagement_window_days.max(1))
                .unwrap_or(Duration::MAX),
            classification_scores: cfg.classification_scores.clone(),
            source_scores: cfg.source_scores.clone(),
        })
    }

    /// Score a lead, degrading to the neutral score if anything goes wrong.
    pub fn score(
        &self,
        lead: &Lead,
        history: &[ConversationMessage],
        now: DateTime<Utc>,
    ) -> PriorityScore {
        match self.try_score(lead, history, now) {
            Ok(score) => score,
            Err(e) => {
                warn!(lead_id = %lead.id, error = %e, "Scoring failed, using neutral score");
                PriorityScore::neutral()
            }
        }
    }

    pub fn try_score(
        &self,
        lead: &Lead,
        history: &[ConversationMessage],
        now: DateTime<Utc>,
    ) -> Result<PriorityScore> {
        let factors = self.factors(lead, history, now);
        let w = &self.weights;
        let raw = factors.recency * w.recency
            + factors.engagement * w.engagement
            + factors.classification * w.classification
            + factors.source * w.source
            + factors.interaction_frequency * w.interaction_frequency
            + factors.value * w.value
            + factors.time_since_contact * w.time_since_contact;

        if !raw.is_finite() {
            return Err(LeadflowError::Scoring(format!(
                "non-finite score for lead {}",
                lead.id
            )));
        }
        Ok(PriorityScore {
            score: clamp01(raw),
            factors,
            fallback: false,
        })
    }

    pub fn factors(
        &self,
        lead: &Lead,
        history: &[ConversationMessage],
        now: DateTime<Utc>,
    ) -> PriorityFactors {
        let since_contact = last_contact(lead, history).map(|at| now - at);
        PriorityFactors {
            recency: self.recency(since_contact),
            engagement: self.engagement(history, now),
            classification: lookup(
                &self.classification_scores,
                lead.meta_str("classification").as_deref(),
            ),
            source: lookup(&self.source_scores, lead.meta_str("source").as_deref()),
            interaction_frequency: interaction_frequency(history.len()),
            value: value_score(lead),
            time_since_contact: time_since_contact(since_contact),
        }
    }

    /// Urgency grows linearly with days since contact and saturates at one
    /// half-life. Never contacted counts as a full half-life.
    fn recency(&self, since_contact: Option<Duration>) -> f64 {
        let days = match since_contact {
            Some(d) => d.num_seconds().max(0) as f64 / SECONDS_PER_DAY,
            None => self.half_life_days,
        };
        clamp01(days / self.half_life_days)
    }

    /// Inbound share of messages inside the trailing window.
    fn engagement(&self, history: &[ConversationMessage], now: DateTime<Utc>) -> f64 {
        let cutoff = now - self.engagement_window;
        let (inbound, total) = history
            .iter()
            .filter(|m| m.timestamp >= cutoff)
            .fold((0usize, 0usize), |(i, t), m| {
                (i + usize::from(m.direction == Direction::Inbound), t + 1)
            });
        if total == 0 {
            0.0
        } else {
            inbound as f64 / total as f64
        }
    }

    /// Score every candidate and return the top `n`, highest first.
    pub fn rank(
        &self,
        candidates: Vec<(Lead, Vec<ConversationMessage>)>,
        n: usize,
        now: DateTime<Utc>,
    ) -> Vec<(Lead, PriorityScore)> {
        let mut scored: Vec<(Lead, PriorityScore)> = candidates
            .into_iter()
            .map(|(lead, history)| {
                let score = self.score(&lead, &history, now);
                (lead, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.score.partial_cmp(&a.1.score).unwrap_or(Ordering::Equal));
        scored.truncate(n);
        scored
    }
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

fn lookup(table: &HashMap<String, f64>, key: Option<&str>) -> f64 {
    key.and_then(|k| table.get(k))
        .or_else(|| table.get(DEFAULT_BUCKET))
        .copied()
        .map(clamp01)
        .unwrap_or(PriorityScore::NEUTRAL)
}

fn interaction_frequency(count: usize) -> f64 {
    match count {
        c if c > 10 => 1.0,
        c if c > 5 => 0.8,
        c if c > 2 => 0.6,
        c if c > 0 => 0.4,
        _ => 0.2,
    }
}

fn time_since_contact(since: Option<Duration>) -> f64 {
    let Some(since) = since else {
        return 1.0;
    };
    if since < Duration::hours(24) {
        0.2
    } else if since < Duration::days(3) {
        0.4
    } else if since < Duration::days(7) {
        0.6
    } else if since < Duration::days(14) {
        0.8
    } else {
        1.0
    }
}

fn numeric(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Explicit priority label wins; otherwise the mean of whichever numeric
/// value indicators are present, on a 0-100 scale.
fn value_score(lead: &Lead) -> f64 {
    match lead.meta_str("priority").as_deref() {
        Some("high") => return 1.0,
        Some("medium") => return 0.7,
        Some("low") => return 0.4,
        _ => {}
    }
    let indicators: Vec<f64> = ["budget", "property_value", "urgency"]
        .iter()
        .filter_map(|k| lead.metadata.get(*k).and_then(numeric))
        .collect();
    if indicators.is_empty() {
        return PriorityScore::NEUTRAL;
    }
    let mean = indicators.iter().sum::<f64>() / indicators.len() as f64;
    clamp01(mean / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn scorer() -> PriorityScorer {
        PriorityScorer::new(&PriorityConfig::default()).unwrap()
    }

    fn msg(direction: Direction, ago: Duration, now: DateTime<Utc>) -> ConversationMessage {
        ConversationMessage {
            lead_id: "L1".into(),
            direction,
            body: "text".into(),
            timestamp: now - ago,
        }
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut cfg = PriorityConfig::default();
        cfg.weights.recency = 0.9;
        assert!(matches!(
            PriorityScorer::new(&cfg),
            Err(LeadflowError::Config(_))
        ));
    }

    #[test]
    fn never_contacted_has_full_recency() {
        let now = Utc::now();
        let score = scorer().score(&Lead::new("L1"), &[], now);
        assert_eq!(score.factors.recency, 1.0);
        assert_eq!(score.factors.time_since_contact, 1.0);
        assert!(!score.fallback);
        // recency .30 + classification .075 + source .05 + interactions .02
        // + value .05 + time .10
        assert!((score.score - 0.595).abs() < 1e-9, "{}", score.score);
    }

    #[test]
    fn unknown_metadata_uses_default_buckets() {
        let mut lead = Lead::new("L1");
        lead.metadata.insert("classification".into(), json!("lukewarm"));
        lead.metadata.insert("source".into(), json!(42));
        let f = scorer().factors(&lead, &[], Utc::now());
        assert_eq!(f.classification, 0.5);
        assert_eq!(f.source, 0.5);
        assert_eq!(f.value, 0.5);
    }

    #[test]
    fn known_metadata_is_looked_up() {
        let mut lead = Lead::new("L1");
        lead.metadata.insert("classification".into(), json!("Hot"));
        lead.metadata.insert("source".into(), json!("referral"));
        lead.metadata.insert("priority".into(), json!("Medium"));
        let f = scorer().factors(&lead, &[], Utc::now());
        assert_eq!((f.classification, f.source, f.value), (1.0, 1.0, 0.7));
    }

    #[test]
    fn value_is_mean_of_present_indicators() {
        let mut lead = Lead::new("L1");
        lead.metadata.insert("budget".into(), json!(80));
        lead.metadata.insert("urgency".into(), json!("40"));
        lead.metadata.insert("property_value".into(), json!("lots"));
        assert!((value_score(&lead) - 0.6).abs() < 1e-9);
        lead.metadata.insert("budget".into(), json!(1_000_000));
        assert_eq!(value_score(&lead), 1.0);
    }

    #[test]
    fn engagement_counts_only_window() {
        let now = Utc::now();
        let history = vec![
            msg(Direction::Inbound, Duration::days(1), now),
            msg(Direction::Outbound, Duration::days(2), now),
            msg(Direction::Inbound, Duration::days(3), now),
            msg(Direction::Inbound, Duration::days(45), now),
        ];
        let f = scorer().factors(&Lead::new("L1"), &history, now);
        assert!((f.engagement - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(f.interaction_frequency, 0.6);
    }

    #[test]
    fn time_bands() {
        assert_eq!(time_since_contact(Some(Duration::hours(2))), 0.2);
        assert_eq!(time_since_contact(Some(Duration::days(2))), 0.4);
        assert_eq!(time_since_contact(Some(Duration::days(6))), 0.6);
        assert_eq!(time_since_contact(Some(Duration::days(10))), 0.8);
        assert_eq!(time_since_contact(Some(Duration::days(30))), 1.0);
    }

    #[test]
    fn rank_returns_top_n_descending() {
        let now = Utc::now();
        let mut hot = Lead::new("hot");
        hot.metadata.insert("classification".into(), json!("hot"));
        let mut cold = Lead::new("cold");
        cold.metadata.insert("classification".into(), json!("cold"));
        cold.last_contact_at = Some(now - Duration::hours(1));
        let plain = Lead::new("plain");

        let ranked = scorer().rank(
            vec![(cold, vec![]), (hot, vec![]), (plain, vec![])],
            2,
            now,
        );
        let ids: Vec<_> = ranked.iter().map(|(l, _)| l.id.as_str()).collect();
        assert_eq!(ids, vec!["hot", "plain"]);
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            any::<f64>()
                .prop_filter("json numbers are finite", |f| f.is_finite())
                .prop_map(Value::from),
            ".{0,12}".prop_map(Value::from),
            prop_oneof![Just("High"), Just("nan"), Just("inf"), Just("-1e308"), Just("hot")]
                .prop_map(Value::from),
            Just(json!([1, 2, 3])),
            Just(json!({"nested": true})),
        ]
    }

    fn arb_key() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("classification".to_string()),
            Just("source".to_string()),
            Just("priority".to_string()),
            Just("budget".to_string()),
            Just("property_value".to_string()),
            Just("urgency".to_string()),
            "[a-z_]{1,10}",
        ]
    }

    proptest! {
        #[test]
        fn scores_always_within_unit_interval(
            metadata in prop::collection::hash_map(arb_key(), arb_value(), 0..8),
            contact_offset_secs in prop::option::of(-1_000_000i64..100_000_000),
            history in prop::collection::vec((any::<bool>(), -1_000_000i64..10_000_000), 0..20),
        ) {
            let now = Utc::now();
            let mut lead = Lead::new("P1");
            lead.metadata = metadata;
            lead.last_contact_at = contact_offset_secs.map(|s| now - Duration::seconds(s));
            let history: Vec<_> = history
                .into_iter()
                .map(|(inbound, ago)| ConversationMessage {
                    lead_id: "P1".into(),
                    direction: if inbound { Direction::Inbound } else { Direction::Outbound },
                    body: String::new(),
                    timestamp: now - Duration::seconds(ago),
                })
                .collect();

            let score = scorer().try_score(&lead, &history, now).unwrap();
            prop_assert!((0.0..=1.0).contains(&score.score));
            let f = score.factors;
            for x in [f.recency, f.engagement, f.classification, f.source,
                      f.interaction_frequency, f.value, f.time_since_contact] {
                prop_assert!((0.0..=1.0).contains(&x));
            }
        }

        #[test]
        fn older_contact_never_lowers_score(a in 0i64..5_000_000, b in 0i64..5_000_000) {
            let now = Utc::now();
            let (newer, older) = (a.min(b), a.max(b));
            let mut lead = Lead::new("M1");
            lead.last_contact_at = Some(now - Duration::seconds(newer));
            let s_newer = scorer().score(&lead, &[], now).score;
            lead.last_contact_at = Some(now - Duration::seconds(older));
            let s_older = scorer().score(&lead, &[], now).score;
            lead.last_contact_at = None;
            let s_never = scorer().score(&lead, &[], now).score;
            prop_assert!(s_older >= s_newer);
            prop_assert!(s_never >= s_older);
        }

        #[test]
        fn more_inbound_replies_never_lower_score(
            messages in prop::collection::vec((any::<bool>(), 0i64..2_000_000), 1..15),
        ) {
            let now = Utc::now();
            let lead = Lead::new("E1");
            let to_history = |messages: &[(bool, i64)]| -> Vec<ConversationMessage> {
                messages
                    .iter()
                    .map(|&(inbound, ago)| ConversationMessage {
                        lead_id: "E1".into(),
                        direction: if inbound { Direction::Inbound } else { Direction::Outbound },
                        body: String::new(),
                        timestamp: now - Duration::seconds(ago),
                    })
                    .collect()
            };

            // Same messages at the same times, with one outbound turned inbound.
            let mut more_inbound = messages.clone();
            if let Some(m) = more_inbound.iter_mut().find(|(inbound, _)| !inbound) {
                m.0 = true;
            }
            let before = scorer().score(&lead, &to_history(&messages), now);
            let after = scorer().score(&lead, &to_history(&more_inbound), now);
            prop_assert!(after.factors.engagement >= before.factors.engagement);
            prop_assert!(after.score >= before.score - 1e-12);
        }
    }
}
