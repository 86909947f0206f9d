//! Minimum re-contact interval.

use chrono::{DateTime, Duration, Utc};
use leadflow_core::{ConversationMessage, Direction, Lead};

#[derive(Debug, Clone, Copy)]
pub struct ThrottleGuard {
    interval: Duration,
}

impl ThrottleGuard {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Intervals too large for a [`Duration`] saturate to "never eligible again".
    pub fn from_seconds(seconds: u64) -> Self {
        Self::new(crate::saturating_seconds(seconds))
    }

    /// A lead is eligible when it has never been contacted or when at least
    /// the throttle interval has elapsed. Exactly at the threshold counts as
    /// eligible. A contact timestamp in the future keeps the lead throttled.
    pub fn eligible(
        &self,
        lead_id: &str,
        last_contact_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(last) = last_contact_at else {
            return true;
        };
        let elapsed = now - last;
        let eligible = elapsed >= self.interval;
        if !eligible {
            tracing::trace!(lead_id, elapsed_secs = elapsed.num_seconds(), "Lead throttled");
        }
        eligible
    }
}

/// Most recent outbound contact: the later of the lead's own timestamp and
/// the newest outbound message in its history.
pub fn last_contact(lead: &Lead, history: &[ConversationMessage]) -> Option<DateTime<Utc>> {
    let newest_outbound = history
        .iter()
        .filter(|m| m.direction == Direction::Outbound)
        .map(|m| m.timestamp)
        .max();
    match (lead.last_contact_at, newest_outbound) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
