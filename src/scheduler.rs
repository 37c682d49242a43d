// =============================================================================
// Signal Scheduler — periodic per-user signal generation loop
// =============================================================================
//
// Per tick:
//   1. Fetch active users with their plan (fresh every tick).
//   2. For each user, with its own error and panic boundary:
//        plan → tier → model URI → cached model → features → inference →
//        action → quota check → Signal
//      Any failure skips that user only.
//   3. Commit the tick's signals as one batch. A failed commit drops the
//      batch; the next tick is the retry.
//   4. Sleep for the configured interval unless a stop was requested.
//
// Lifecycle: RUNNING → STOPPING → STOPPED. `stop()` never interrupts the
// tick in flight; the loop exits at the next tick boundary.
// =============================================================================

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::{stream, FutureExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::features::FeatureProvider;
use crate::inference::InferenceRunner;
use crate::model_cache::ModelCache;
use crate::models::{ActiveUser, Signal};
use crate::outcome::{Stage, UserOutcome};
use crate::quota::{PlanQuotaEnforcer, QuotaDecision};
use crate::registry::ModelVersionRegistry;
use crate::repository::Repository;
use crate::runtime_config::RuntimeConfig;
use crate::types::{Action, SchedulerState, Tier};

/// Maximum number of tick reports to retain.
const MAX_RECENT_TICKS: usize = 20;

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub call_timeout: Duration,
    pub symbol: String,
    pub max_concurrent_users: usize,
    pub enable_live_trading: bool,
    pub enable_paper_trading: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            interval: config.loop_interval(),
            call_timeout: config.call_timeout(),
            symbol: config.symbol.clone(),
            max_concurrent_users: config.max_concurrent_users,
            enable_live_trading: config.enable_live_trading,
            enable_paper_trading: config.enable_paper_trading,
        }
    }

    fn trading_enabled(&self) -> bool {
        self.enable_live_trading || self.enable_paper_trading
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

// =============================================================================
// Reports and counters
// =============================================================================

/// Summary of one tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Trading was disabled; no users were processed.
    pub skipped: bool,
    pub users: usize,
    pub signals: usize,
    pub quota_skips: usize,
    pub failures: usize,
    /// Whether the signal batch reached the repository.
    pub committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub outcomes: Vec<UserOutcome>,
}

/// Lock-free lifetime counters.
#[derive(Default)]
pub struct SchedulerStats {
    ticks: AtomicU64,
    signals_committed: AtomicU64,
    quota_skips: AtomicU64,
    user_failures: AtomicU64,
    tick_failures: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatsSnapshot {
    pub ticks: u64,
    pub signals_committed: u64,
    pub quota_skips: u64,
    pub user_failures: u64,
    pub tick_failures: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            signals_committed: self.signals_committed.load(Ordering::Relaxed),
            quota_skips: self.quota_skips.load(Ordering::Relaxed),
            user_failures: self.user_failures.load(Ordering::Relaxed),
            tick_failures: self.tick_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for SchedulerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerStats")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Control surface for a running scheduler loop.
pub struct SchedulerHandle {
    state: Arc<watch::Sender<SchedulerState>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request a graceful stop. Idempotent.
    pub fn stop(&self) {
        let requested = self.state.send_if_modified(|s| {
            if *s == SchedulerState::Running {
                *s = SchedulerState::Stopping;
                true
            } else {
                false
            }
        });
        if requested {
            info!("scheduler stop requested, finishing in-flight tick");
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Wait for the loop to exit.
    pub async fn wait(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }

    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.stop();
        self.wait().await
    }
}

// =============================================================================
// Scheduler
// =============================================================================

pub struct SignalScheduler {
    repo: Arc<dyn Repository>,
    registry: Arc<ModelVersionRegistry>,
    cache: Arc<ModelCache>,
    features: Arc<dyn FeatureProvider>,
    runner: Arc<dyn InferenceRunner>,
    quota: Arc<PlanQuotaEnforcer>,
    settings: SchedulerSettings,
    stats: SchedulerStats,
    tick_seq: AtomicU64,
    recent_ticks: RwLock<Vec<TickReport>>,
}

impl SignalScheduler {
    pub fn new(
        repo: Arc<dyn Repository>,
        registry: Arc<ModelVersionRegistry>,
        cache: Arc<ModelCache>,
        features: Arc<dyn FeatureProvider>,
        runner: Arc<dyn InferenceRunner>,
        quota: Arc<PlanQuotaEnforcer>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            repo,
            registry,
            cache,
            features,
            runner,
            quota,
            settings,
            stats: SchedulerStats::default(),
            tick_seq: AtomicU64::new(0),
            recent_ticks: RwLock::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Most recent tick reports, oldest first.
    pub fn recent_ticks(&self) -> Vec<TickReport> {
        self.recent_ticks.read().clone()
    }

    pub fn last_tick(&self) -> Option<TickReport> {
        self.recent_ticks.read().last().cloned()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the loop. The first tick starts immediately.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (tx, rx) = watch::channel(SchedulerState::Running);
        let tx = Arc::new(tx);
        let task = tokio::spawn(self.run_loop(tx.clone(), rx));
        SchedulerHandle { state: tx, task }
    }

    async fn run_loop(
        self: Arc<Self>,
        state: Arc<watch::Sender<SchedulerState>>,
        mut rx: watch::Receiver<SchedulerState>,
    ) {
        info!(
            interval_secs = self.settings.interval.as_secs_f64(),
            symbol = %self.settings.symbol,
            max_concurrent_users = self.settings.max_concurrent_users,
            "signal scheduler started"
        );

        loop {
            let current = *rx.borrow_and_update();
            if current != SchedulerState::Running {
                break;
            }

            self.run_tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = rx.changed() => {}
            }
        }

        state.send_replace(SchedulerState::Stopped);
        info!(ticks = self.stats.snapshot().ticks, "signal scheduler stopped");
    }

    // ── Tick ────────────────────────────────────────────────────────────

    /// Run one full tick and return its report. Never fails; problems are
    /// recorded in the report and the counters.
    pub async fn run_tick(&self) -> TickReport {
        let tick = self.tick_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let started_at = Utc::now();
        let clock = Instant::now();
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        let mut report = TickReport {
            tick,
            started_at,
            duration_ms: 0,
            skipped: false,
            users: 0,
            signals: 0,
            quota_skips: 0,
            failures: 0,
            committed: false,
            error: None,
            outcomes: Vec::new(),
        };

        if !self.settings.trading_enabled() {
            info!(tick, "live and paper trading both disabled, skipping tick");
            report.skipped = true;
            return self.finish_tick(report, clock);
        }

        let users = match self.repo.list_active_users_with_plans().await {
            Ok(users) => users,
            Err(e) => {
                error!(tick, error = %e, "failed to list active users");
                self.stats.tick_failures.fetch_add(1, Ordering::Relaxed);
                report.error = Some(e.to_string());
                return self.finish_tick(report, clock);
            }
        };
        report.users = users.len();

        let pending: Vec<_> = users
            .iter()
            .map(|au| self.process_user_isolated(au))
            .collect();
        let outcomes: Vec<UserOutcome> = stream::iter(pending)
            .buffer_unordered(self.settings.max_concurrent_users.max(1))
            .collect()
            .await;

        for o in &outcomes {
            match o.final_decision {
                "SIGNAL" => report.signals += 1,
                "SKIP" => report.quota_skips += 1,
                _ => report.failures += 1,
            }
        }
        self.stats
            .quota_skips
            .fetch_add(report.quota_skips as u64, Ordering::Relaxed);
        self.stats
            .user_failures
            .fetch_add(report.failures as u64, Ordering::Relaxed);

        let batch: Vec<Signal> = outcomes.iter().filter_map(|o| o.signal.clone()).collect();
        report.outcomes = outcomes;

        if batch.is_empty() {
            report.committed = true;
        } else {
            let n = batch.len() as u64;
            match self.repo.commit_signals(batch).await {
                Ok(()) => {
                    report.committed = true;
                    self.stats.signals_committed.fetch_add(n, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(tick, signals = n, error = %e, "signal batch commit failed, dropping batch");
                    self.stats.tick_failures.fetch_add(1, Ordering::Relaxed);
                    report.error = Some(e.to_string());
                }
            }
        }

        self.finish_tick(report, clock)
    }

    fn finish_tick(&self, mut report: TickReport, clock: Instant) -> TickReport {
        report.duration_ms = clock.elapsed().as_millis() as u64;
        info!(
            tick = report.tick,
            users = report.users,
            signals = report.signals,
            quota_skips = report.quota_skips,
            failures = report.failures,
            committed = report.committed,
            duration_ms = report.duration_ms,
            "tick complete"
        );

        let mut recent = self.recent_ticks.write();
        recent.push(report.clone());
        while recent.len() > MAX_RECENT_TICKS {
            recent.remove(0);
        }
        report
    }

    // ── Per-user pipeline ───────────────────────────────────────────────

    async fn process_user_isolated(&self, au: &ActiveUser) -> UserOutcome {
        match AssertUnwindSafe(self.process_user(au)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(user_id = %au.user.id, panic = %message, "user processing panicked");
                UserOutcome::panicked(au.user.id, &au.plan.code, plan_to_tier(au), message)
            }
        }
    }

    async fn process_user(&self, au: &ActiveUser) -> UserOutcome {
        let user = &au.user;
        let tier = plan_to_tier(au);
        let symbol = self.settings.symbol.as_str();
        let fail = |stage: Stage, e: CoreError| {
            warn!(
                user_id = %user.id,
                plan = %au.plan.code,
                tier = %tier,
                stage = %stage,
                error = %e,
                "user skipped"
            );
            UserOutcome::failed(user.id, &au.plan.code, tier, stage, &e)
        };

        let resolved = match self
            .registry
            .resolve_model(tier, user.enterprise_slug.as_deref())
            .await
        {
            Ok(r) => r,
            Err(e) => return fail(Stage::ModelResolution, e),
        };

        let model = match self.bounded("model load", self.cache.get(&resolved.uri)).await {
            Ok(m) => m,
            Err(e) => return fail(Stage::ModelLoad, e),
        };

        let features = match self
            .bounded("feature retrieval", self.features.features(symbol))
            .await
        {
            Ok(f) => f,
            Err(e) => return fail(Stage::Features, e),
        };

        let prediction = match self
            .bounded("inference", self.runner.predict(&model, &features))
            .await
        {
            Ok(p) => p,
            Err(e) => return fail(Stage::Inference, e),
        };

        let (value, action) = match prediction.score() {
            Some(score) => (score, Action::from_score(score)),
            None => {
                warn!(user_id = %user.id, model = %resolved.name, prediction = ?prediction, "non-numeric model output, defaulting to HOLD");
                (0.0, Action::Hold)
            }
        };

        let notional = features.get("price").copied();
        match self.quota.check(user, &au.plan, symbol, notional).await {
            Ok(QuotaDecision::Allow) => {}
            Ok(QuotaDecision::Deny(kind)) => {
                info!(user_id = %user.id, plan = %au.plan.code, quota = %kind, "quota exceeded, no signal this tick");
                return UserOutcome::skipped(user.id, &au.plan.code, tier, kind);
            }
            Err(e) => return fail(Stage::Quota, e),
        }

        debug!(user_id = %user.id, model = %resolved.name, value, action = %action, "signal generated");
        let signal = Signal::new(user.id, symbol, value, action, resolved.name);
        UserOutcome::signal(&au.plan.code, tier, signal)
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = CoreResult<T>>,
    ) -> CoreResult<T> {
        let limit = self.settings.call_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout {
                operation,
                after_ms: limit.as_millis() as u64,
            }),
        }
    }
}

/// Plan code to tier; anything unrecognised is served as the lowest tier.
fn plan_to_tier(au: &ActiveUser) -> Tier {
    match au.plan.code.parse::<Tier>() {
        Ok(tier) => tier,
        Err(_) => {
            warn!(user_id = %au.user.id, plan_code = %au.plan.code, fallback = %Tier::LOWEST, "unknown plan code, using lowest tier");
            Tier::LOWEST
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
