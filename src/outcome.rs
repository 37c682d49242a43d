// =============================================================================
// User Outcome — auditable record of what a tick decided for one user
// =============================================================================
//
// Every user processed in a tick ends in exactly one outcome:
//   SIGNAL  a signal was produced and queued for the batch commit
//   SKIP    a plan quota denied the signal
//   FAIL    a pipeline stage errored, timed out or panicked
// =============================================================================

use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::Signal;
use crate::quota::QuotaKind;
use crate::types::Tier;

/// Pipeline stage a user's processing stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ModelResolution,
    ModelLoad,
    Features,
    Inference,
    Quota,
    Panic,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelResolution => write!(f, "model_resolution"),
            Self::ModelLoad => write!(f, "model_load"),
            Self::Features => write!(f, "features"),
            Self::Inference => write!(f, "inference"),
            Self::Quota => write!(f, "quota"),
            Self::Panic => write!(f, "panic"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserOutcome {
    pub user_id: Uuid,
    pub plan_code: String,
    pub tier: Tier,

    /// "SIGNAL", "SKIP" or "FAIL".
    pub final_decision: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,

    /// Error kind or quota kind, machine readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip)]
    pub signal: Option<Signal>,
}

impl UserOutcome {
    pub fn signal(plan_code: impl Into<String>, tier: Tier, signal: Signal) -> Self {
        Self {
            user_id: signal.user_id,
            plan_code: plan_code.into(),
            tier,
            final_decision: "SIGNAL",
            stage: None,
            reason: None,
            detail: None,
            signal: Some(signal),
        }
    }

    pub fn skipped(user_id: Uuid, plan_code: impl Into<String>, tier: Tier, kind: QuotaKind) -> Self {
        Self {
            user_id,
            plan_code: plan_code.into(),
            tier,
            final_decision: "SKIP",
            stage: Some(Stage::Quota),
            reason: Some(kind.to_string()),
            detail: None,
            signal: None,
        }
    }

    pub fn failed(
        user_id: Uuid,
        plan_code: impl Into<String>,
        tier: Tier,
        stage: Stage,
        error: &CoreError,
    ) -> Self {
        Self {
            user_id,
            plan_code: plan_code.into(),
            tier,
            final_decision: "FAIL",
            stage: Some(stage),
            reason: Some(error.kind().to_string()),
            detail: Some(error.to_string()),
            signal: None,
        }
    }

    pub fn panicked(user_id: Uuid, plan_code: impl Into<String>, tier: Tier, message: String) -> Self {
        Self {
            user_id,
            plan_code: plan_code.into(),
            tier,
            final_decision: "FAIL",
            stage: Some(Stage::Panic),
            reason: Some("panic".to_string()),
            detail: Some(message),
            signal: None,
        }
    }

    pub fn is_signal(&self) -> bool {
        self.signal.is_some()
    }
}
