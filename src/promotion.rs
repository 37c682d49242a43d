// =============================================================================
// Promotion Evaluator — champion/challenger comparison on Sharpe
// =============================================================================
//
// A candidate replaces the incumbent only when its Sharpe is strictly
// greater; a missing or NaN Sharpe compares below every real value. The
// swap is a compare-and-swap on the slot's current champion, so two
// evaluations racing on one slot can never leave two champions behind. On a
// conflict the comparison is re-run against the new incumbent.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{ChampionKey, ModelVersion};
use crate::repository::{Repository, SwapResult};
use crate::types::ModelStatus;

/// Compare-and-swap attempts before giving up on a contended slot.
const MAX_SWAP_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PromotionOutcome {
    /// The candidate is now champion. `demoted` is the previous champion.
    Promoted { demoted: Option<Uuid> },
    /// The incumbent scored at least as well and keeps the slot.
    Retained { champion: Uuid },
    /// The candidate already holds the slot.
    AlreadyChampion,
}

impl PromotionOutcome {
    pub fn promoted(&self) -> bool {
        matches!(self, Self::Promoted { .. })
    }
}

pub struct PromotionEvaluator {
    repo: Arc<dyn Repository>,
}

impl PromotionEvaluator {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Decide whether `candidate_id` should become champion of `key` and
    /// apply the decision atomically.
    pub async fn evaluate_and_promote(
        &self,
        key: &ChampionKey,
        candidate_id: Uuid,
    ) -> CoreResult<PromotionOutcome> {
        let candidate = self
            .repo
            .get_model_version(candidate_id)
            .await?
            .ok_or_else(|| CoreError::InvalidInput(format!("model version {candidate_id} not found")))?;

        if &candidate.key() != key {
            return Err(CoreError::InvalidInput(format!(
                "model version {candidate_id} belongs to {}, not {key}",
                candidate.key()
            )));
        }
        match candidate.status {
            ModelStatus::Champion => return Ok(PromotionOutcome::AlreadyChampion),
            ModelStatus::Archived => {
                return Err(CoreError::InvalidInput(format!(
                    "model version {candidate_id} is archived"
                )))
            }
            ModelStatus::Challenger => {}
        }

        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let incumbent = self.repo.find_champion(key).await?;
            if incumbent.as_ref().map(|v| v.id) == Some(candidate.id) {
                return Ok(PromotionOutcome::AlreadyChampion);
            }

            if let Some(champion) = &incumbent {
                if !beats(&candidate, champion) {
                    info!(
                        slot = %key,
                        candidate = %candidate.name,
                        candidate_sharpe = ?candidate.sharpe,
                        champion = %champion.name,
                        champion_sharpe = ?champion.sharpe,
                        "PROMOTION: candidate did not beat champion, keeping incumbent"
                    );
                    return Ok(PromotionOutcome::Retained {
                        champion: champion.id,
                    });
                }
            }

            let expected = incumbent.as_ref().map(|v| v.id);
            match self.repo.swap_champion(key, candidate.id, expected).await? {
                SwapResult::Swapped { demoted } => {
                    info!(
                        slot = %key,
                        candidate = %candidate.name,
                        sharpe = ?candidate.sharpe,
                        demoted = ?demoted,
                        "PROMOTION: candidate promoted to champion"
                    );
                    return Ok(PromotionOutcome::Promoted { demoted });
                }
                SwapResult::Conflict { current } => {
                    if current == Some(candidate.id) {
                        return Ok(PromotionOutcome::AlreadyChampion);
                    }
                    warn!(
                        slot = %key,
                        attempt,
                        expected = ?expected,
                        current = ?current,
                        "PROMOTION: champion changed concurrently, re-evaluating"
                    );
                }
            }
        }

        Err(CoreError::PersistenceFailure(format!(
            "champion slot {key} kept changing; gave up after {MAX_SWAP_ATTEMPTS} attempts"
        )))
    }
}

/// Strictly-greater comparison; ties keep the incumbent.
fn beats(candidate: &ModelVersion, champion: &ModelVersion) -> bool {
    candidate.comparable_sharpe() > champion.comparable_sharpe()
}
