// =============================================================================
// Runtime Configuration — signal engine settings with atomic save
// =============================================================================
//
// Every tunable of the scheduler, model cache and model resolution lives
// here. Values come from a JSON file (missing fields take their defaults),
// then environment variables override individual fields.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Tier;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_loop_interval_secs() -> u64 {
    60
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_cache_capacity() -> usize {
    32
}

fn default_max_concurrent_users() -> usize {
    8
}

fn default_symbol() -> String {
    "SPY".to_string()
}

fn default_start_price() -> f64 {
    100.0
}

fn default_volatility() -> f64 {
    0.01
}

// =============================================================================
// DefaultModelUris
// =============================================================================

/// Model served for a tier when no champion has been promoted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultModelUris {
    #[serde(default)]
    pub freemium: Option<String>,
    #[serde(default)]
    pub plus: Option<String>,
    #[serde(default)]
    pub enterprise: Option<String>,
}

impl DefaultModelUris {
    /// Configured URI for `tier`; blank strings count as unset.
    pub fn for_tier(&self, tier: Tier) -> Option<&str> {
        let uri = match tier {
            Tier::Freemium => &self.freemium,
            Tier::Plus => &self.plus,
            Tier::Enterprise => &self.enterprise,
        };
        uri.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn slot_mut(&mut self, tier: Tier) -> &mut Option<String> {
        match tier {
            Tier::Freemium => &mut self.freemium,
            Tier::Plus => &mut self.plus,
            Tier::Enterprise => &mut self.enterprise,
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Scheduler ----------------------------------------------------------

    /// Seconds between the end of one tick and the start of the next.
    #[serde(default = "default_loop_interval_secs")]
    pub loop_interval_secs: u64,

    /// Upper bound for each model load, feature fetch and inference call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Users processed concurrently within one tick.
    #[serde(default = "default_max_concurrent_users")]
    pub max_concurrent_users: usize,

    /// Symbol every signal is produced for.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Ticks run only while at least one of these is enabled.
    #[serde(default)]
    pub enable_live_trading: bool,

    #[serde(default = "default_true")]
    pub enable_paper_trading: bool,

    // --- Models -------------------------------------------------------------

    /// Loaded artifacts kept resident before LRU eviction.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default)]
    pub default_model_uris: DefaultModelUris,

    // --- Synthetic features -------------------------------------------------

    #[serde(default = "default_start_price")]
    pub synthetic_start_price: f64,

    #[serde(default = "default_volatility")]
    pub synthetic_volatility: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            loop_interval_secs: default_loop_interval_secs(),
            call_timeout_ms: default_call_timeout_ms(),
            max_concurrent_users: default_max_concurrent_users(),
            symbol: default_symbol(),
            enable_live_trading: false,
            enable_paper_trading: true,
            cache_capacity: default_cache_capacity(),
            default_model_uris: DefaultModelUris::default(),
            synthetic_start_price: default_start_price(),
            synthetic_volatility: default_volatility(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            loop_interval_secs = config.loop_interval_secs,
            symbol = %config.symbol,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Unset keys leave the field alone;
    /// unparsable values are an error.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        for tier in Tier::ALL {
            let key = format!("DEFAULT_MODEL_URI_{tier}");
            if let Some(uri) = lookup(&key) {
                *self.default_model_uris.slot_mut(tier) = Some(uri);
            }
        }
        if let Some(v) = lookup("TRADING_LOOP_INTERVAL_SECONDS") {
            self.loop_interval_secs = parse_var("TRADING_LOOP_INTERVAL_SECONDS", &v)?;
        }
        if let Some(v) = lookup("MODEL_CACHE_CAPACITY") {
            self.cache_capacity = parse_var("MODEL_CACHE_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("CALL_TIMEOUT_MS") {
            self.call_timeout_ms = parse_var("CALL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("MAX_CONCURRENT_USERS") {
            self.max_concurrent_users = parse_var("MAX_CONCURRENT_USERS", &v)?;
        }
        if let Some(v) = lookup("SIGNAL_SYMBOL") {
            self.symbol = v.trim().to_string();
        }
        if let Some(v) = lookup("ENABLE_LIVE_TRADING") {
            self.enable_live_trading = parse_flag("ENABLE_LIVE_TRADING", &v)?;
        }
        if let Some(v) = lookup("ENABLE_PAPER_TRADING") {
            self.enable_paper_trading = parse_flag("ENABLE_PAPER_TRADING", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.loop_interval_secs == 0 {
            bail!("loop_interval_secs must be at least 1");
        }
        if self.call_timeout_ms == 0 {
            bail!("call_timeout_ms must be at least 1");
        }
        if self.cache_capacity == 0 {
            bail!("cache_capacity must be at least 1");
        }
        if self.max_concurrent_users == 0 {
            bail!("max_concurrent_users must be at least 1");
        }
        if self.symbol.trim().is_empty() {
            bail!("symbol must not be empty");
        }
        if !(self.synthetic_start_price.is_finite() && self.synthetic_start_price > 0.0) {
            bail!("synthetic_start_price must be a positive number");
        }
        Ok(())
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: {value:?}"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => bail!("invalid value for {key}: {value:?} (expected true/false)"),
    }
}
