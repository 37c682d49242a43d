// =============================================================================
// Error kinds for the orchestration core
// =============================================================================
//
// Per-user failures inside a scheduler tick are converted into a skipped
// outcome by the scheduler; every other caller receives these synchronously.
// =============================================================================

use thiserror::Error;

use crate::quota::QuotaKind;

/// Every failure the core can report.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    #[error("invalid tier '{0}' (expected FREEMIUM, PLUS or ENTERPRISE)")]
    InvalidTier(String),

    #[error("invalid training metrics: {0}")]
    InvalidMetrics(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model artifact not found at {uri}")]
    ArtifactNotFound { uri: String },

    #[error("model artifact at {uri} could not be loaded: {reason}")]
    ArtifactUnreadable { uri: String, reason: String },

    #[error("no champion registered and no default model URI configured for tier {tier}")]
    NoDefaultConfigured { tier: String },

    #[error("plan quota exceeded: {kind}")]
    QuotaExceeded { kind: QuotaKind },

    #[error("inference failed: {0}")]
    InferenceFailure(String),

    #[error("{operation} timed out after {after_ms} ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl CoreError {
    /// Short machine-readable label, used in outcome records and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTier(_) => "invalid_tier",
            Self::InvalidMetrics(_) => "invalid_metrics",
            Self::InvalidInput(_) => "invalid_input",
            Self::ArtifactNotFound { .. } => "artifact_not_found",
            Self::ArtifactUnreadable { .. } => "artifact_unreadable",
            Self::NoDefaultConfigured { .. } => "no_default_configured",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::InferenceFailure(_) => "inference_failure",
            Self::Timeout { .. } => "timeout",
            Self::PersistenceFailure(_) => "persistence_failure",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_error_message_names_the_kind() {
        let err = CoreError::QuotaExceeded {
            kind: QuotaKind::DailySignalLimit,
        };
        assert_eq!(err.to_string(), "plan quota exceeded: daily_signal_limit");
        assert_eq!(err.kind(), "quota_exceeded");
    }

    #[test]
    fn timeout_message_includes_operation() {
        let err = CoreError::Timeout {
            operation: "feature retrieval",
            after_ms: 250,
        };
        assert_eq!(err.to_string(), "feature retrieval timed out after 250 ms");
    }
}
