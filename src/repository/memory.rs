// =============================================================================
// In-memory repository — reference implementation of `Repository`
// =============================================================================
//
// Every operation takes the single `RwLock` once, so multi-row updates
// (signal batches, champion swaps) are atomic with respect to readers.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{Repository, SwapResult};
use crate::error::{CoreError, CoreResult};
use crate::models::{ActiveUser, ChampionKey, ModelVersion, Plan, Signal, User};
use crate::types::{ModelStatus, Tier};

/// A model candidate listed in a seed file, registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSeed {
    pub tier: Tier,
    #[serde(default)]
    pub enterprise_slug: Option<String>,
    #[serde(default)]
    pub training_run_id: Option<String>,
    pub model_uri: String,
    pub metrics: serde_json::Value,
}

/// Bootstrap content for the in-memory repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub candidates: Vec<CandidateSeed>,
}

impl SeedData {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed data from {}", path.display()))?;
        let seed: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse seed data from {}", path.display()))?;
        info!(
            path = %path.display(),
            plans = seed.plans.len(),
            users = seed.users.len(),
            candidates = seed.candidates.len(),
            "seed data loaded"
        );
        Ok(seed)
    }
}

#[derive(Default)]
struct Inner {
    plans: HashMap<String, Plan>,
    users: Vec<User>,
    signals: Vec<Signal>,
    versions: Vec<ModelVersion>,
}

impl Inner {
    fn champion_index(&self, key: &ChampionKey) -> Option<usize> {
        self.versions
            .iter()
            .position(|v| v.status == ModelStatus::Champion && &v.key() == key)
    }

    fn version_index(&self, id: Uuid) -> Option<usize> {
        self.versions.iter().position(|v| v.id == id)
    }
}

#[derive(Default)]
pub struct InMemoryRepository {
    inner: RwLock<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository holding the seed's plans and users. Candidates are
    /// left to the caller so they flow through registration and promotion.
    pub fn from_seed(seed: &SeedData) -> Self {
        let repo = Self::new();
        for plan in &seed.plans {
            repo.upsert_plan(plan.clone());
        }
        for user in &seed.users {
            repo.upsert_user(user.clone());
        }
        repo
    }

    pub fn upsert_plan(&self, plan: Plan) {
        self.inner.write().plans.insert(plan.code.clone(), plan);
    }

    pub fn upsert_user(&self, user: User) {
        let mut inner = self.inner.write();
        match inner.users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user,
            None => inner.users.push(user),
        }
    }

    /// Every committed signal, oldest first.
    pub fn all_signals(&self) -> Vec<Signal> {
        self.inner.read().signals.clone()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_active_users_with_plans(&self) -> CoreResult<Vec<ActiveUser>> {
        let inner = self.inner.read();
        let mut out = Vec::with_capacity(inner.users.len());
        for user in inner.users.iter().filter(|u| u.is_active) {
            match inner.plans.get(&user.plan_code) {
                Some(plan) => out.push(ActiveUser {
                    user: user.clone(),
                    plan: plan.clone(),
                }),
                None => warn!(user_id = %user.id, plan_code = %user.plan_code, "user has no matching plan row, skipping"),
            }
        }
        Ok(out)
    }

    async fn count_signals_since(&self, user_id: Uuid, since: DateTime<Utc>) -> CoreResult<u64> {
        let inner = self.inner.read();
        Ok(inner
            .signals
            .iter()
            .filter(|s| s.user_id == user_id && s.timestamp >= since)
            .count() as u64)
    }

    async fn signals_since(&self, user_id: Uuid, since: DateTime<Utc>) -> CoreResult<Vec<Signal>> {
        let inner = self.inner.read();
        let mut out: Vec<Signal> = inner
            .signals
            .iter()
            .filter(|s| s.user_id == user_id && s.timestamp >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    async fn commit_signals(&self, batch: Vec<Signal>) -> CoreResult<()> {
        let mut inner = self.inner.write();
        inner.signals.extend(batch);
        Ok(())
    }

    async fn find_champion(&self, key: &ChampionKey) -> CoreResult<Option<ModelVersion>> {
        let inner = self.inner.read();
        Ok(inner.champion_index(key).map(|i| inner.versions[i].clone()))
    }

    async fn get_model_version(&self, id: Uuid) -> CoreResult<Option<ModelVersion>> {
        let inner = self.inner.read();
        Ok(inner.version_index(id).map(|i| inner.versions[i].clone()))
    }

    async fn list_model_versions(&self, tier: Option<Tier>) -> CoreResult<Vec<ModelVersion>> {
        let inner = self.inner.read();
        let mut out: Vec<ModelVersion> = inner
            .versions
            .iter()
            .filter(|v| tier.map_or(true, |t| v.tier == t))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn insert_model_version(&self, version: ModelVersion) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if inner.version_index(version.id).is_some() {
            return Err(CoreError::PersistenceFailure(format!(
                "model version {} already exists",
                version.id
            )));
        }
        inner.versions.push(version);
        Ok(())
    }

    async fn swap_champion(
        &self,
        key: &ChampionKey,
        candidate: Uuid,
        expected: Option<Uuid>,
    ) -> CoreResult<SwapResult> {
        let mut inner = self.inner.write();

        let candidate_idx = inner
            .version_index(candidate)
            .ok_or_else(|| CoreError::PersistenceFailure(format!("model version {candidate} not found")))?;
        if &inner.versions[candidate_idx].key() != key {
            return Err(CoreError::PersistenceFailure(format!(
                "model version {candidate} does not belong to {key}"
            )));
        }

        if inner.versions[candidate_idx].status == ModelStatus::Archived {
            return Err(CoreError::InvalidInput(format!(
                "model version {candidate} is archived"
            )));
        }

        let incumbent_idx = inner.champion_index(key);
        let current = incumbent_idx.map(|i| inner.versions[i].id);
        if current != expected {
            return Ok(SwapResult::Conflict { current });
        }

        // Both rows change under the same write guard.
        if let Some(i) = incumbent_idx {
            inner.versions[i].status = ModelStatus::Challenger;
        }
        inner.versions[candidate_idx].status = ModelStatus::Champion;

        Ok(SwapResult::Swapped { demoted: current })
    }

    async fn set_status_if(
        &self,
        id: Uuid,
        expected: ModelStatus,
        status: ModelStatus,
    ) -> CoreResult<ModelStatus> {
        let mut inner = self.inner.write();
        let idx = inner
            .version_index(id)
            .ok_or_else(|| CoreError::PersistenceFailure(format!("model version {id} not found")))?;
        let found = inner.versions[idx].status;
        if found == expected {
            inner.versions[idx].status = status;
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{plan, user, version};

    #[tokio::test]
    async fn lists_only_active_users_with_known_plans() {
        let repo = InMemoryRepository::new();
        repo.upsert_plan(plan("FREEMIUM", 3));
        let active = user("FREEMIUM");
        let mut inactive = user("FREEMIUM");
        inactive.is_active = false;
        let orphan = user("GHOST");
        repo.upsert_user(active.clone());
        repo.upsert_user(inactive);
        repo.upsert_user(orphan);

        let rows = repo.list_active_users_with_plans().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user.id, active.id);
        assert_eq!(rows[0].plan.code, "FREEMIUM");
    }

    #[tokio::test]
    async fn plan_changes_are_visible_on_next_listing() {
        let repo = InMemoryRepository::new();
        repo.upsert_plan(plan("FREEMIUM", 3));
        repo.upsert_plan(plan("PLUS", 10));
        let mut u = user("FREEMIUM");
        repo.upsert_user(u.clone());
        assert_eq!(repo.list_active_users_with_plans().await.unwrap()[0].plan.code, "FREEMIUM");

        u.plan_code = "PLUS".into();
        repo.upsert_user(u);
        assert_eq!(repo.list_active_users_with_plans().await.unwrap()[0].plan.code, "PLUS");
    }

    #[tokio::test]
    async fn swap_requires_expected_incumbent() {
        let repo = InMemoryRepository::new();
        let a = version(Tier::Plus, Some(1.0));
        let b = version(Tier::Plus, Some(2.0));
        repo.insert_model_version(a.clone()).await.unwrap();
        repo.insert_model_version(b.clone()).await.unwrap();
        let key = ChampionKey::new(Tier::Plus, None);

        let r = repo.swap_champion(&key, a.id, None).await.unwrap();
        assert_eq!(r, SwapResult::Swapped { demoted: None });

        // Stale expectation: nothing changes.
        let r = repo.swap_champion(&key, b.id, None).await.unwrap();
        assert_eq!(r, SwapResult::Conflict { current: Some(a.id) });
        assert_eq!(repo.find_champion(&key).await.unwrap().unwrap().id, a.id);

        let r = repo.swap_champion(&key, b.id, Some(a.id)).await.unwrap();
        assert_eq!(r, SwapResult::Swapped { demoted: Some(a.id) });
        assert_eq!(repo.find_champion(&key).await.unwrap().unwrap().id, b.id);
        let demoted = repo.get_model_version(a.id).await.unwrap().unwrap();
        assert_eq!(demoted.status, ModelStatus::Challenger);
    }

    #[tokio::test]
    async fn swap_rejects_candidate_from_other_slot() {
        let repo = InMemoryRepository::new();
        let v = version(Tier::Freemium, Some(1.0));
        repo.insert_model_version(v.clone()).await.unwrap();
        let err = repo
            .swap_champion(&ChampionKey::new(Tier::Plus, None), v.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PersistenceFailure(_)));
    }

    #[tokio::test]
    async fn swap_refuses_archived_candidate() {
        let repo = InMemoryRepository::new();
        let a = version(Tier::Plus, Some(1.0));
        let b = version(Tier::Plus, Some(2.0));
        repo.insert_model_version(a.clone()).await.unwrap();
        repo.insert_model_version(b.clone()).await.unwrap();
        let key = ChampionKey::new(Tier::Plus, None);
        repo.swap_champion(&key, a.id, None).await.unwrap();
        repo.set_status_if(b.id, ModelStatus::Challenger, ModelStatus::Archived)
            .await
            .unwrap();

        let err = repo.swap_champion(&key, b.id, Some(a.id)).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
        assert_eq!(repo.find_champion(&key).await.unwrap().unwrap().id, a.id);
        let b = repo.get_model_version(b.id).await.unwrap().unwrap();
        assert_eq!(b.status, ModelStatus::Archived);
    }

    #[tokio::test]
    async fn conditional_status_write_checks_current_status() {
        let repo = InMemoryRepository::new();
        let v = version(Tier::Plus, Some(1.0));
        repo.insert_model_version(v.clone()).await.unwrap();
        repo.swap_champion(&ChampionKey::new(Tier::Plus, None), v.id, None)
            .await
            .unwrap();

        let found = repo
            .set_status_if(v.id, ModelStatus::Challenger, ModelStatus::Archived)
            .await
            .unwrap();
        assert_eq!(found, ModelStatus::Champion);
        let v = repo.get_model_version(v.id).await.unwrap().unwrap();
        assert_eq!(v.status, ModelStatus::Champion);

        assert!(repo
            .set_status_if(Uuid::new_v4(), ModelStatus::Challenger, ModelStatus::Archived)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn duplicate_version_insert_fails() {
        let repo = InMemoryRepository::new();
        let v = version(Tier::Plus, None);
        repo.insert_model_version(v.clone()).await.unwrap();
        assert!(repo.insert_model_version(v).await.is_err());
    }

    #[tokio::test]
    async fn signals_are_counted_from_the_given_instant() {
        let repo = InMemoryRepository::new();
        let uid = Uuid::new_v4();
        let mut old = Signal::new(uid, "SPY", 0.5, crate::types::Action::Hold, "m");
        old.timestamp = Utc::now() - chrono::Duration::days(2);
        let fresh = Signal::new(uid, "SPY", 0.7, crate::types::Action::Buy, "m");
        let other = Signal::new(Uuid::new_v4(), "SPY", 0.7, crate::types::Action::Buy, "m");
        repo.commit_signals(vec![old, fresh.clone(), other]).await.unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(repo.count_signals_since(uid, since).await.unwrap(), 1);
        assert_eq!(repo.signals_since(uid, since).await.unwrap(), vec![fresh]);
    }

    #[test]
    fn seed_data_parses_with_defaults() {
        let json = r#"{
            "plans": [{"code": "FREEMIUM", "max_signals_per_day": 5}],
            "users": [{"id": "7f0b8c5e-4b7a-4d8e-9a57-3f1d2c7e9b10", "plan_code": "FREEMIUM"}],
            "candidates": [{"tier": "PLUS", "model_uri": "models/plus.json", "metrics": {"sharpe": 1.1}}]
        }"#;
        let seed: SeedData = serde_json::from_str(json).unwrap();
        assert!(seed.users[0].is_active);
        assert_eq!(seed.plans[0].allowed_symbols, None);
        assert_eq!(seed.candidates[0].tier, Tier::Plus);

        let repo = InMemoryRepository::from_seed(&seed);
        assert_eq!(repo.inner.read().users.len(), 1);
    }
}
