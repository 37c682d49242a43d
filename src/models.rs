// =============================================================================
// Records shared by the registry, quota enforcer and scheduler
// =============================================================================

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::types::{Action, ModelStatus, Tier};

// ---------------------------------------------------------------------------
// Model versions
// ---------------------------------------------------------------------------

/// Identifies the champion slot a model version competes for.
///
/// The enterprise slug is only meaningful for `Tier::Enterprise`; it is
/// dropped for every other tier so that `(PLUS, Some("acme"))` and
/// `(PLUS, None)` address the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChampionKey {
    pub tier: Tier,
    pub enterprise_slug: Option<String>,
}

impl ChampionKey {
    pub fn new(tier: Tier, enterprise_slug: Option<&str>) -> Self {
        let enterprise_slug = match tier {
            Tier::Enterprise => enterprise_slug
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            _ => None,
        };
        Self {
            tier,
            enterprise_slug,
        }
    }
}

impl std::fmt::Display for ChampionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.enterprise_slug {
            Some(slug) => write!(f, "{}/{}", self.tier, slug),
            None => write!(f, "{}", self.tier),
        }
    }
}

/// One trained model artifact and its promotion state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: Uuid,
    pub name: String,
    pub tier: Tier,
    #[serde(default)]
    pub enterprise_slug: Option<String>,
    pub status: ModelStatus,
    pub model_uri: String,
    #[serde(default)]
    pub training_run_id: Option<String>,
    #[serde(default)]
    pub sharpe: Option<f64>,
    #[serde(default)]
    pub max_drawdown: Option<f64>,
    #[serde(default)]
    pub trained_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ModelVersion {
    pub fn key(&self) -> ChampionKey {
        ChampionKey::new(self.tier, self.enterprise_slug.as_deref())
    }

    /// Sharpe used for champion comparison: a missing metric never wins.
    pub fn comparable_sharpe(&self) -> f64 {
        match self.sharpe {
            Some(v) if !v.is_nan() => v,
            _ => f64::NEG_INFINITY,
        }
    }
}

/// Metrics reported by an external training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub sharpe: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub trained_until: Option<DateTime<Utc>>,
}

impl TrainingMetrics {
    /// Parse a training report (JSON object).
    ///
    /// `sharpe` (or the trainer's `sharpe_proxy`) must be present; `null`
    /// records an explicitly uncomputed metric. `trained_until` defaults to
    /// `now` when absent.
    pub fn from_report(report: &serde_json::Value, now: DateTime<Utc>) -> CoreResult<Self> {
        let obj = report
            .as_object()
            .ok_or_else(|| CoreError::InvalidMetrics("metrics report must be a JSON object".into()))?;

        let sharpe_value = obj
            .get("sharpe")
            .or_else(|| obj.get("sharpe_proxy"))
            .ok_or_else(|| CoreError::InvalidMetrics("missing required field 'sharpe'".into()))?;
        let sharpe = numeric_or_null("sharpe", sharpe_value)?;

        let max_drawdown = match obj.get("max_drawdown") {
            Some(v) => numeric_or_null("max_drawdown", v)?,
            None => None,
        };

        let trained_until = match obj.get("trained_until") {
            None | Some(serde_json::Value::Null) => Some(now),
            Some(serde_json::Value::String(s)) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|e| CoreError::InvalidMetrics(format!("trained_until: {e}")))?
                    .with_timezone(&Utc),
            ),
            Some(other) => {
                return Err(CoreError::InvalidMetrics(format!(
                    "trained_until must be an RFC 3339 string, got {other}"
                )))
            }
        };

        Ok(Self {
            sharpe,
            max_drawdown,
            trained_until,
        })
    }
}

fn numeric_or_null(field: &str, value: &serde_json::Value) -> CoreResult<Option<f64>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| CoreError::InvalidMetrics(format!("{field} is not representable as f64"))),
        other => Err(CoreError::InvalidMetrics(format!(
            "{field} must be numeric or null, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Plans, users, signals
// ---------------------------------------------------------------------------

/// Subscription plan limits. Read-only from the core's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub max_signals_per_day: u32,
    #[serde(default)]
    pub max_capital_per_user: Option<f64>,
    #[serde(default)]
    pub data_delay_seconds: u32,
    /// `None` means every symbol is allowed.
    #[serde(default)]
    pub allowed_symbols: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: String,
    pub plan_code: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub enterprise_slug: Option<String>,
}

fn default_active() -> bool {
    true
}

/// An active user joined with their current plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveUser {
    pub user: User,
    pub plan: Plan,
}

/// One persisted recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub action: Action,
    pub model_name: String,
}

impl Signal {
    pub fn new(
        user_id: Uuid,
        symbol: impl Into<String>,
        value: f64,
        action: Action,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            symbol: symbol.into(),
            timestamp: Utc::now(),
            value,
            action,
            model_name: model_name.into(),
        }
    }
}
