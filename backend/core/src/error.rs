use thiserror::Error;

/// Top-level error type for the Leadflow engine.
///
/// Every collaborator call and every engine operation reports failures through
/// this enum. [`LeadflowError::is_retryable`] decides whether the retry layer
/// may attempt the operation again.
#[derive(Debug, Error)]
pub enum LeadflowError {
    /// The candidate lead list could not be fetched. Fatal to a cycle.
    #[error("cannot enumerate leads: {0}")]
    LeadSource(String),

    #[error("lead store error: {0}")]
    Store(String),

    #[error("gateway error ({gateway}): {message}")]
    Gateway {
        gateway: String,
        message: String,
        retryable: bool,
    },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("message composition failed: {0}")]
    Compose(String),

    #[error("scoring failed: {0}")]
    Scoring(String),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("a follow-up cycle is already running")]
    CycleInProgress,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LeadflowError>;

impl LeadflowError {
    /// Build a gateway error that the retry layer will attempt again.
    pub fn transient_gateway(gateway: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Gateway {
            gateway: gateway.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Build a gateway error that no amount of retrying will fix
    /// (bad recipient, rejected payload).
    pub fn permanent_gateway(gateway: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Gateway {
            gateway: gateway.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether another attempt of the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LeadSource(_)
            | Self::Store(_)
            | Self::RateLimited(_)
            | Self::Timeout(_)
            | Self::Spreadsheet(_)
            | Self::Queue(_) => true,
            Self::Gateway { retryable, .. } => *retryable,
            Self::Compose(_)
            | Self::Scoring(_)
            | Self::Config(_)
            | Self::CycleInProgress
            | Self::Other(_) => false,
        }
    }

    /// Stable label used as the "error type" in retry accounting and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LeadSource(_) => "lead_source",
            Self::Store(_) => "store",
            Self::Gateway { .. } => "gateway",
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Compose(_) => "compose",
            Self::Scoring(_) => "scoring",
            Self::Spreadsheet(_) => "spreadsheet",
            Self::Queue(_) => "queue",
            Self::Config(_) => "config",
            Self::CycleInProgress => "cycle_in_progress",
            Self::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_retryability_follows_flag() {
        assert!(LeadflowError::transient_gateway("sms", "503").is_retryable());
        assert!(!LeadflowError::permanent_gateway("sms", "bad number").is_retryable());
    }

    #[test]
    fn compose_and_config_are_terminal() {
        assert!(!LeadflowError::Compose("empty".into()).is_retryable());
        assert!(!LeadflowError::Config("weights".into()).is_retryable());
        assert_eq!(LeadflowError::Store("down".into()).kind(), "store");
    }
}
