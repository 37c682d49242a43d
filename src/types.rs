// =============================================================================
// Shared enums used across the signal platform
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Subscription tier. Determines which model family serves a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Freemium,
    Plus,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Freemium, Tier::Plus, Tier::Enterprise];

    /// The tier every unknown plan falls back to.
    pub const LOWEST: Tier = Tier::Freemium;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Freemium => "FREEMIUM",
            Self::Plus => "PLUS",
            Self::Enterprise => "ENTERPRISE",
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Self::LOWEST
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FREEMIUM" => Ok(Self::Freemium),
            "PLUS" => Ok(Self::Plus),
            "ENTERPRISE" => Ok(Self::Enterprise),
            _ => Err(CoreError::InvalidTier(s.to_string())),
        }
    }
}

/// Lifecycle status of a model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
    Challenger,
    Champion,
    Archived,
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Challenger => write!(f, "CHALLENGER"),
            Self::Champion => write!(f, "CHAMPION"),
            Self::Archived => write!(f, "ARCHIVED"),
        }
    }
}

/// Recommendation carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

/// Scores strictly above this map to BUY.
pub const BUY_THRESHOLD: f64 = 0.6;
/// Scores strictly below this map to SELL.
pub const SELL_THRESHOLD: f64 = 0.4;

impl Action {
    /// Fixed-threshold mapping from a model score to an action.
    pub fn from_score(score: f64) -> Self {
        if score > BUY_THRESHOLD {
            Self::Buy
        } else if score < SELL_THRESHOLD {
            Self::Sell
        } else {
            Self::Hold
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Lifecycle of the signal scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerState {
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}
