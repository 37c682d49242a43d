// =============================================================================
// Model Version Registry — champion resolution and candidate registration
// =============================================================================
//
// Resolution order for a (tier, enterprise slug) slot:
//   1. The CHAMPION row in the repository.
//   2. The statically configured default URI for the tier.
//   3. `NoDefaultConfigured`.
//
// Candidates always enter as CHALLENGER; only the promotion evaluator and the
// administrative `archive` operation change a version's status afterwards.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{ChampionKey, ModelVersion, TrainingMetrics};
use crate::promotion::{PromotionEvaluator, PromotionOutcome};
use crate::repository::Repository;
use crate::runtime_config::DefaultModelUris;
use crate::types::{ModelStatus, Tier};

/// Where a resolved model URI came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    ChampionDb,
    DefaultSettings,
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChampionDb => write!(f, "champion_db"),
            Self::DefaultSettings => write!(f, "default_settings"),
        }
    }
}

/// The model that should serve a slot right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedModel {
    pub tier: Tier,
    pub uri: String,
    /// Name recorded on every signal this model produces.
    pub name: String,
    pub source: ModelSource,
    pub version_id: Option<Uuid>,
}

pub struct ModelVersionRegistry {
    repo: Arc<dyn Repository>,
    defaults: DefaultModelUris,
    evaluator: PromotionEvaluator,
}

impl ModelVersionRegistry {
    pub fn new(repo: Arc<dyn Repository>, defaults: DefaultModelUris) -> Self {
        let evaluator = PromotionEvaluator::new(repo.clone());
        Self {
            repo,
            defaults,
            evaluator,
        }
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    /// Current champion for the slot, if one is registered.
    pub async fn resolve_champion(
        &self,
        tier: Tier,
        enterprise_slug: Option<&str>,
    ) -> CoreResult<Option<ModelVersion>> {
        let key = ChampionKey::new(tier, enterprise_slug);
        self.repo.find_champion(&key).await
    }

    /// Same as [`resolve_champion`](Self::resolve_champion) for a tier given
    /// as text; unknown tiers fail with `InvalidTier`.
    pub async fn resolve_champion_by_name(
        &self,
        tier: &str,
        enterprise_slug: Option<&str>,
    ) -> CoreResult<Option<ModelVersion>> {
        let tier: Tier = tier.parse()?;
        self.resolve_champion(tier, enterprise_slug).await
    }

    /// Champion URI for the slot, falling back to the tier's default URI.
    pub async fn resolve_model(
        &self,
        tier: Tier,
        enterprise_slug: Option<&str>,
    ) -> CoreResult<ResolvedModel> {
        if let Some(champion) = self.resolve_champion(tier, enterprise_slug).await? {
            debug!(tier = %tier, version_id = %champion.id, uri = %champion.model_uri, "using champion model (source: db)");
            return Ok(ResolvedModel {
                tier,
                uri: champion.model_uri,
                name: champion.name,
                source: ModelSource::ChampionDb,
                version_id: Some(champion.id),
            });
        }

        match self.defaults.for_tier(tier) {
            Some(uri) => {
                debug!(tier = %tier, uri = %uri, "using default model URI (source: settings)");
                Ok(ResolvedModel {
                    tier,
                    uri: uri.to_string(),
                    name: format!("default:{tier}"),
                    source: ModelSource::DefaultSettings,
                    version_id: None,
                })
            }
            None => Err(CoreError::NoDefaultConfigured {
                tier: tier.to_string(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register a freshly trained artifact as a CHALLENGER.
    pub async fn register_candidate(
        &self,
        tier: Tier,
        training_run_id: Option<&str>,
        model_uri: &str,
        metrics: &serde_json::Value,
    ) -> CoreResult<ModelVersion> {
        self.register(ChampionKey::new(tier, None), training_run_id, model_uri, metrics)
            .await
    }

    /// Register a candidate for one enterprise customer's dedicated slot.
    pub async fn register_enterprise_candidate(
        &self,
        enterprise_slug: &str,
        training_run_id: Option<&str>,
        model_uri: &str,
        metrics: &serde_json::Value,
    ) -> CoreResult<ModelVersion> {
        let key = ChampionKey::new(Tier::Enterprise, Some(enterprise_slug));
        if key.enterprise_slug.is_none() {
            return Err(CoreError::InvalidInput("enterprise slug must not be empty".into()));
        }
        self.register(key, training_run_id, model_uri, metrics).await
    }

    async fn register(
        &self,
        key: ChampionKey,
        training_run_id: Option<&str>,
        model_uri: &str,
        metrics: &serde_json::Value,
    ) -> CoreResult<ModelVersion> {
        let model_uri = model_uri.trim();
        if model_uri.is_empty() {
            return Err(CoreError::InvalidInput("model URI must not be empty".into()));
        }

        let now = Utc::now();
        let metrics = TrainingMetrics::from_report(metrics, now)?;
        let id = Uuid::new_v4();
        let training_run_id = training_run_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let version = ModelVersion {
            id,
            name: version_name(&key, training_run_id.as_deref(), id),
            tier: key.tier,
            enterprise_slug: key.enterprise_slug.clone(),
            status: ModelStatus::Challenger,
            model_uri: model_uri.to_string(),
            training_run_id,
            sharpe: metrics.sharpe,
            max_drawdown: metrics.max_drawdown,
            trained_until: metrics.trained_until,
            created_at: now,
        };

        self.repo.insert_model_version(version.clone()).await?;
        info!(
            version_id = %version.id,
            name = %version.name,
            slot = %key,
            sharpe = ?version.sharpe,
            "registered new model candidate"
        );
        Ok(version)
    }

    // -------------------------------------------------------------------------
    // Promotion and administration
    // -------------------------------------------------------------------------

    /// Run the champion/challenger comparison for `candidate` in its slot.
    pub async fn promote(
        &self,
        tier: Tier,
        candidate: &ModelVersion,
        enterprise_slug: Option<&str>,
    ) -> CoreResult<PromotionOutcome> {
        let key = ChampionKey::new(tier, enterprise_slug);
        self.evaluator.evaluate_and_promote(&key, candidate.id).await
    }

    pub async fn get(&self, id: Uuid) -> CoreResult<Option<ModelVersion>> {
        self.repo.get_model_version(id).await
    }

    /// All versions newest first, optionally for one tier.
    pub async fn list_versions(&self, tier: Option<Tier>) -> CoreResult<Vec<ModelVersion>> {
        self.repo.list_model_versions(tier).await
    }

    /// Retire a version permanently. The serving champion cannot be archived;
    /// promote a replacement first. The status check and the write are one
    /// repository call.
    pub async fn archive(&self, id: Uuid) -> CoreResult<ModelVersion> {
        let mut version = self
            .repo
            .get_model_version(id)
            .await?
            .ok_or_else(|| CoreError::InvalidInput(format!("model version {id} not found")))?;

        let found = self
            .repo
            .set_status_if(id, ModelStatus::Challenger, ModelStatus::Archived)
            .await?;
        match found {
            ModelStatus::Challenger => {
                version.status = ModelStatus::Archived;
                info!(version_id = %id, name = %version.name, "model version archived");
                Ok(version)
            }
            ModelStatus::Archived => {
                version.status = ModelStatus::Archived;
                Ok(version)
            }
            ModelStatus::Champion => {
                warn!(version_id = %id, slot = %version.key(), "refusing to archive the serving champion");
                Err(CoreError::InvalidInput(format!(
                    "model version {id} is the champion of {}",
                    version.key()
                )))
            }
        }
    }
}

fn version_name(key: &ChampionKey, training_run_id: Option<&str>, id: Uuid) -> String {
    let tier = key.tier.as_str().to_ascii_lowercase();
    let run = match training_run_id {
        Some(run) => run.to_string(),
        None => id.simple().to_string()[..8].to_string(),
    };
    match &key.enterprise_slug {
        Some(slug) => format!("{tier}-{slug}-{run}"),
        None => format!("{tier}-{run}"),
    }
}
