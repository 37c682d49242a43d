// =============================================================================
// Persistence Repository — the core's only view of durable state
// =============================================================================
//
// Implementations must make `commit_signals` and `swap_champion` atomic:
// either every row changes or none does, and concurrent readers of
// `find_champion` never see an intermediate state.
// =============================================================================

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::{ActiveUser, ChampionKey, ModelVersion, Signal};
use crate::types::{ModelStatus, Tier};

pub use memory::{InMemoryRepository, SeedData};

/// Result of a compare-and-swap on a champion slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapResult {
    /// The candidate is now champion; carries the demoted incumbent, if any.
    Swapped { demoted: Option<Uuid> },
    /// The slot's champion was not the expected one; nothing changed.
    Conflict { current: Option<Uuid> },
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Active users joined with their plan, read fresh on every call.
    async fn list_active_users_with_plans(&self) -> CoreResult<Vec<ActiveUser>>;

    async fn count_signals_since(&self, user_id: Uuid, since: DateTime<Utc>) -> CoreResult<u64>;

    async fn signals_since(&self, user_id: Uuid, since: DateTime<Utc>) -> CoreResult<Vec<Signal>>;

    /// Persist a batch of signals as one transaction.
    async fn commit_signals(&self, batch: Vec<Signal>) -> CoreResult<()>;

    async fn find_champion(&self, key: &ChampionKey) -> CoreResult<Option<ModelVersion>>;

    async fn get_model_version(&self, id: Uuid) -> CoreResult<Option<ModelVersion>>;

    /// Versions newest first, optionally restricted to one tier.
    async fn list_model_versions(&self, tier: Option<Tier>) -> CoreResult<Vec<ModelVersion>>;

    async fn insert_model_version(&self, version: ModelVersion) -> CoreResult<()>;

    /// Atomically make `candidate` the champion of `key`, demoting the
    /// incumbent to CHALLENGER, provided the incumbent is still `expected`.
    /// An archived candidate is rejected with `InvalidInput`.
    async fn swap_champion(
        &self,
        key: &ChampionKey,
        candidate: Uuid,
        expected: Option<Uuid>,
    ) -> CoreResult<SwapResult>;

    /// Set the status of `id` to `status` only if it is currently `expected`.
    /// Returns the status found before the write; the write happened iff it
    /// equals `expected`.
    async fn set_status_if(
        &self,
        id: Uuid,
        expected: ModelStatus,
        status: ModelStatus,
    ) -> CoreResult<ModelStatus>;
}
