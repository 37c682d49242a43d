// Shared fixtures for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::artifact::{ArtifactLoader, LoadedModel, ModelBody};
use crate::error::{CoreError, CoreResult};
use crate::features::{FeatureProvider, FeatureVector};
use crate::models::{ActiveUser, ChampionKey, ModelVersion, Plan, Signal, User};
use crate::repository::{InMemoryRepository, Repository, SwapResult};
use crate::types::{ModelStatus, Tier};

pub fn plan(code: &str, max_signals_per_day: u32) -> Plan {
    Plan {
        code: code.to_string(),
        name: code.to_string(),
        max_signals_per_day,
        max_capital_per_user: None,
        data_delay_seconds: 0,
        allowed_symbols: None,
    }
}

pub fn user(plan_code: &str) -> User {
    let id = Uuid::new_v4();
    User {
        id,
        email: format!("{}@example.com", id.simple()),
        plan_code: plan_code.to_string(),
        is_active: true,
        enterprise_slug: None,
    }
}

pub fn version(tier: Tier, sharpe: Option<f64>) -> ModelVersion {
    let id = Uuid::new_v4();
    ModelVersion {
        id,
        name: format!("test-{}", id.simple()),
        tier,
        enterprise_slug: None,
        status: ModelStatus::Challenger,
        model_uri: format!("models/{}.json", id.simple()),
        training_run_id: None,
        sharpe,
        max_drawdown: None,
        trained_until: None,
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Artifact loader that counts physical loads per URI
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingLoader {
    delay: Option<Duration>,
    loads: Mutex<HashMap<String, usize>>,
    bodies: Mutex<HashMap<String, ModelBody>>,
    missing: Mutex<HashSet<String>>,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_body(&self, uri: &str, body: ModelBody) {
        self.bodies.lock().insert(uri.to_string(), body);
    }

    pub fn fail_uri(&self, uri: &str) {
        self.missing.lock().insert(uri.to_string());
    }

    pub fn heal_uri(&self, uri: &str) {
        self.missing.lock().remove(uri);
    }

    pub fn loads(&self, uri: &str) -> usize {
        self.loads.lock().get(uri).copied().unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.loads.lock().values().sum()
    }
}

#[async_trait]
impl ArtifactLoader for CountingLoader {
    async fn load(&self, uri: &str) -> CoreResult<LoadedModel> {
        *self.loads.lock().entry(uri.to_string()).or_insert(0) += 1;
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.missing.lock().contains(uri) {
            return Err(CoreError::ArtifactNotFound {
                uri: uri.to_string(),
            });
        }
        let body = self
            .bodies
            .lock()
            .get(uri)
            .cloned()
            .unwrap_or_else(|| ModelBody::Constant(serde_json::json!(0.5)));
        Ok(LoadedModel {
            uri: uri.to_string(),
            loaded_at: Utc::now(),
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// Feature provider with scripted misbehaviour on the n-th call (1-based)
// ---------------------------------------------------------------------------

pub struct StubFeatures {
    price: Option<f64>,
    calls: AtomicUsize,
    fail_on: Option<usize>,
    panic_on: Option<usize>,
    delay_on: Option<(usize, Duration)>,
}

impl StubFeatures {
    pub fn new(price: f64) -> Self {
        Self {
            price: Some(price),
            calls: AtomicUsize::new(0),
            fail_on: None,
            panic_on: None,
            delay_on: None,
        }
    }

    pub fn without_price(mut self) -> Self {
        self.price = None;
        self
    }

    pub fn fail_on_call(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    pub fn panic_on_call(mut self, n: usize) -> Self {
        self.panic_on = Some(n);
        self
    }

    pub fn delay_on_call(mut self, n: usize, delay: Duration) -> Self {
        self.delay_on = Some((n, delay));
        self
    }
}

#[async_trait]
impl FeatureProvider for StubFeatures {
    async fn features(&self, _symbol: &str) -> CoreResult<FeatureVector> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, delay)) = self.delay_on {
            if n == call {
                tokio::time::sleep(delay).await;
            }
        }
        if self.panic_on == Some(call) {
            panic!("feature provider exploded on call {call}");
        }
        if self.fail_on == Some(call) {
            return Err(CoreError::InvalidInput(format!("no features on call {call}")));
        }
        let mut fv = FeatureVector::from([("return_1".to_string(), 0.0)]);
        if let Some(price) = self.price {
            fv.insert("price".to_string(), price);
        }
        Ok(fv)
    }
}

// ---------------------------------------------------------------------------
// Repository wrapper with failing commits and a one-shot hook that runs
// right after the next model version read
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ReadHook {
    /// Make `candidate` champion of `key`, whoever holds the slot.
    Promote { key: ChampionKey, candidate: Uuid },
    /// Archive the version if it is still a challenger.
    Archive(Uuid),
}

pub struct ScriptedRepository {
    inner: Arc<InMemoryRepository>,
    fail: AtomicBool,
    after_read: Mutex<Option<ReadHook>>,
}

impl ScriptedRepository {
    pub fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self {
            inner,
            fail: AtomicBool::new(false),
            after_read: Mutex::new(None),
        }
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn after_next_read(&self, hook: ReadHook) {
        *self.after_read.lock() = Some(hook);
    }

    async fn run_hook(&self, hook: ReadHook) -> CoreResult<()> {
        match hook {
            ReadHook::Promote { key, candidate } => {
                let current = self.inner.find_champion(&key).await?.map(|v| v.id);
                self.inner.swap_champion(&key, candidate, current).await?;
            }
            ReadHook::Archive(id) => {
                self.inner
                    .set_status_if(id, ModelStatus::Challenger, ModelStatus::Archived)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for ScriptedRepository {
    async fn list_active_users_with_plans(&self) -> CoreResult<Vec<ActiveUser>> {
        self.inner.list_active_users_with_plans().await
    }

    async fn count_signals_since(&self, user_id: Uuid, since: DateTime<Utc>) -> CoreResult<u64> {
        self.inner.count_signals_since(user_id, since).await
    }

    async fn signals_since(&self, user_id: Uuid, since: DateTime<Utc>) -> CoreResult<Vec<Signal>> {
        self.inner.signals_since(user_id, since).await
    }

    async fn commit_signals(&self, batch: Vec<Signal>) -> CoreResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::PersistenceFailure("connection reset".into()));
        }
        self.inner.commit_signals(batch).await
    }

    async fn find_champion(&self, key: &ChampionKey) -> CoreResult<Option<ModelVersion>> {
        self.inner.find_champion(key).await
    }

    async fn get_model_version(&self, id: Uuid) -> CoreResult<Option<ModelVersion>> {
        let found = self.inner.get_model_version(id).await?;
        let hook = self.after_read.lock().take();
        if let Some(hook) = hook {
            self.run_hook(hook).await?;
        }
        Ok(found)
    }

    async fn list_model_versions(&self, tier: Option<Tier>) -> CoreResult<Vec<ModelVersion>> {
        self.inner.list_model_versions(tier).await
    }

    async fn insert_model_version(&self, version: ModelVersion) -> CoreResult<()> {
        self.inner.insert_model_version(version).await
    }

    async fn swap_champion(
        &self,
        key: &ChampionKey,
        candidate: Uuid,
        expected: Option<Uuid>,
    ) -> CoreResult<SwapResult> {
        self.inner.swap_champion(key, candidate, expected).await
    }

    async fn set_status_if(
        &self,
        id: Uuid,
        expected: ModelStatus,
        status: ModelStatus,
    ) -> CoreResult<ModelStatus> {
        self.inner.set_status_if(id, expected, status).await
    }
}
