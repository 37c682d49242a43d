// =============================================================================
// Plan Quota Enforcer — per-user gate applied before a signal is emitted
// =============================================================================
//
// Checks, in order (the first failure wins):
//   1. Daily Signal Limit — signals since 00:00 UTC must be below the plan's
//                           max_signals_per_day.
//   2. Notional Limit     — notional must not exceed max_capital_per_user,
//                           when both the plan cap and the notional are known.
//   3. Symbol Allowed     — symbol must be in allowed_symbols, when the plan
//                           restricts them.
//
// The count and the later persist are not one transaction: two checks for
// the same user racing each other may both see the same count. The scheduler
// processes each user at most once per tick, which keeps the overshoot to
// concurrent ticks only.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::models::{Plan, Signal, User};
use crate::repository::Repository;

/// Which plan limit rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    DailySignalLimit,
    NotionalLimit,
    SymbolNotAllowed,
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DailySignalLimit => write!(f, "daily_signal_limit"),
            Self::NotionalLimit => write!(f, "notional_limit"),
            Self::SymbolNotAllowed => write!(f, "symbol_not_allowed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow,
    Deny(QuotaKind),
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// `Deny(kind)` becomes `CoreError::QuotaExceeded { kind }`.
    pub fn into_result(self) -> CoreResult<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(kind) => Err(CoreError::QuotaExceeded { kind }),
        }
    }
}

/// Midnight UTC of the day containing `now`.
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

pub struct PlanQuotaEnforcer {
    repo: Arc<dyn Repository>,
}

impl PlanQuotaEnforcer {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn check(
        &self,
        user: &User,
        plan: &Plan,
        symbol: &str,
        notional: Option<f64>,
    ) -> CoreResult<QuotaDecision> {
        self.check_at(Utc::now(), user, plan, symbol, notional).await
    }

    /// Same as [`check`](Self::check) with an explicit clock.
    pub async fn check_at(
        &self,
        now: DateTime<Utc>,
        user: &User,
        plan: &Plan,
        symbol: &str,
        notional: Option<f64>,
    ) -> CoreResult<QuotaDecision> {
        // 1. Daily signal limit
        let since = start_of_utc_day(now);
        let count = self.repo.count_signals_since(user.id, since).await?;
        if count >= u64::from(plan.max_signals_per_day) {
            warn!(
                user_id = %user.id,
                plan = %plan.code,
                count,
                limit = plan.max_signals_per_day,
                "QUOTA: daily signal limit reached"
            );
            return Ok(QuotaDecision::Deny(QuotaKind::DailySignalLimit));
        }

        // 2. Notional limit
        if let (Some(cap), Some(notional)) = (plan.max_capital_per_user, notional) {
            if !notional.is_finite() {
                // Unknown exposure is let through; the signal still counts
                // against the daily limit.
                warn!(user_id = %user.id, notional, "QUOTA: non-finite notional, skipping capital check");
            } else if notional > cap {
                warn!(
                    user_id = %user.id,
                    plan = %plan.code,
                    notional,
                    cap,
                    "QUOTA: notional exceeds plan capital limit"
                );
                return Ok(QuotaDecision::Deny(QuotaKind::NotionalLimit));
            }
        }

        // 3. Symbol allow-list
        if let Some(allowed) = &plan.allowed_symbols {
            if !allowed.contains(symbol) {
                warn!(user_id = %user.id, plan = %plan.code, symbol, "QUOTA: symbol not allowed by plan");
                return Ok(QuotaDecision::Deny(QuotaKind::SymbolNotAllowed));
            }
        }

        debug!(user_id = %user.id, count, symbol, "quota check passed");
        Ok(QuotaDecision::Allow)
    }

    /// Signals the user received since 00:00 UTC, newest first.
    pub async fn signals_today(&self, user: &User) -> CoreResult<Vec<Signal>> {
        self.repo
            .signals_since(user.id, start_of_utc_day(Utc::now()))
            .await
    }
}
