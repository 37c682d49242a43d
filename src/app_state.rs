// =============================================================================
// Central Application State — tiered signal engine
// =============================================================================
//
// Builds every component once and ties them together: the repository, the
// model registry, the model cache, the quota enforcer and the scheduler.
// All components manage their own interior mutability; AppState only hands
// out Arc references and assembles a serialisable snapshot.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::artifact::ArtifactLoader;
use crate::error::CoreResult;
use crate::features::FeatureProvider;
use crate::inference::InferenceRunner;
use crate::model_cache::{CacheStats, ModelCache};
use crate::models::ModelVersion;
use crate::promotion::PromotionOutcome;
use crate::quota::PlanQuotaEnforcer;
use crate::registry::ModelVersionRegistry;
use crate::repository::memory::CandidateSeed;
use crate::repository::Repository;
use crate::runtime_config::RuntimeConfig;
use crate::scheduler::{SchedulerSettings, SchedulerStatsSnapshot, SignalScheduler, TickReport};
use crate::types::Tier;

/// Current champion of one tier-wide slot.
#[derive(Debug, Clone, Serialize)]
pub struct ChampionSummary {
    pub tier: Tier,
    pub name: Option<String>,
    pub model_uri: Option<String>,
    pub sharpe: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub uptime_secs: u64,
    pub symbol: String,
    pub loop_interval_secs: u64,
    pub scheduler: SchedulerStatsSnapshot,
    pub cache: CacheStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick: Option<TickReport>,
}

/// Shared across all tasks via `Arc<AppState>`.
pub struct AppState {
    /// Read once at startup; components copy what they need.
    pub runtime_config: RuntimeConfig,
    pub repo: Arc<dyn Repository>,
    pub registry: Arc<ModelVersionRegistry>,
    pub cache: Arc<ModelCache>,
    pub quota: Arc<PlanQuotaEnforcer>,
    pub scheduler: Arc<SignalScheduler>,
    start_time: Instant,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        repo: Arc<dyn Repository>,
        loader: Arc<dyn ArtifactLoader>,
        features: Arc<dyn FeatureProvider>,
        runner: Arc<dyn InferenceRunner>,
    ) -> Self {
        let registry = Arc::new(ModelVersionRegistry::new(
            repo.clone(),
            config.default_model_uris.clone(),
        ));
        let cache = Arc::new(ModelCache::new(loader, config.cache_capacity));
        let quota = Arc::new(PlanQuotaEnforcer::new(repo.clone()));
        let scheduler = Arc::new(SignalScheduler::new(
            repo.clone(),
            registry.clone(),
            cache.clone(),
            features,
            runner,
            quota.clone(),
            SchedulerSettings::from_config(&config),
        ));

        Self {
            runtime_config: config,
            repo,
            registry,
            cache,
            quota,
            scheduler,
            start_time: Instant::now(),
        }
    }

    // ── Bootstrap ───────────────────────────────────────────────────────

    /// Register each seeded candidate and run it through promotion. A bad
    /// candidate is logged and skipped.
    pub async fn register_seed_candidates(&self, candidates: &[CandidateSeed]) -> usize {
        let mut promoted = 0;
        for seed in candidates {
            match self.register_and_promote(seed).await {
                Ok((version, outcome)) => {
                    if outcome.promoted() {
                        promoted += 1;
                    }
                    info!(name = %version.name, outcome = ?outcome, "seed candidate processed");
                }
                Err(e) => {
                    warn!(tier = %seed.tier, uri = %seed.model_uri, error = %e, "seed candidate rejected");
                }
            }
        }
        promoted
    }

    async fn register_and_promote(
        &self,
        seed: &CandidateSeed,
    ) -> CoreResult<(ModelVersion, PromotionOutcome)> {
        let run = seed.training_run_id.as_deref();
        let version = match (seed.tier, seed.enterprise_slug.as_deref()) {
            (Tier::Enterprise, Some(slug)) => {
                self.registry
                    .register_enterprise_candidate(slug, run, &seed.model_uri, &seed.metrics)
                    .await?
            }
            (tier, _) => {
                self.registry
                    .register_candidate(tier, run, &seed.model_uri, &seed.metrics)
                    .await?
            }
        };
        let outcome = self
            .registry
            .promote(version.tier, &version, version.enterprise_slug.as_deref())
            .await?;
        Ok((version, outcome))
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Tier-wide champions (enterprise customer slots excluded).
    pub async fn champions(&self) -> CoreResult<Vec<ChampionSummary>> {
        let mut out = Vec::with_capacity(Tier::ALL.len());
        for tier in Tier::ALL {
            let champion = self.registry.resolve_champion(tier, None).await?;
            out.push(ChampionSummary {
                tier,
                name: champion.as_ref().map(|v| v.name.clone()),
                model_uri: champion.as_ref().map(|v| v.model_uri.clone()),
                sharpe: champion.and_then(|v| v.sharpe),
            });
        }
        Ok(out)
    }

    pub fn build_snapshot(&self) -> StateSnapshot {
        let config = &self.runtime_config;
        StateSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            symbol: config.symbol.clone(),
            loop_interval_secs: config.loop_interval_secs,
            scheduler: self.scheduler.stats(),
            cache: self.cache.stats(),
            last_tick: self.scheduler.last_tick(),
        }
    }
}
