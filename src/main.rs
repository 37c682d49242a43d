// =============================================================================
// Tiered Signals — Main Entry Point
// =============================================================================
//
// Boots an in-memory repository from an optional seed file, registers and
// promotes the seeded model candidates, then runs the signal scheduler until
// Ctrl+C. The scheduler finishes its in-flight tick before the process exits.
// =============================================================================

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use tiered_signals::app_state::AppState;
use tiered_signals::artifact::DefaultArtifactLoader;
use tiered_signals::features::SyntheticFeatureProvider;
use tiered_signals::inference::LinearInferenceRunner;
use tiered_signals::logging::init_logging;
use tiered_signals::repository::{InMemoryRepository, SeedData};
use tiered_signals::runtime_config::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();
    init_logging();

    info!("Tiered Signals starting up");

    let config_path =
        std::env::var("RUNTIME_CONFIG_PATH").unwrap_or_else(|_| "runtime_config.json".to_string());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config
        .apply_env_overrides()
        .context("invalid environment override")?;
    config.validate().context("invalid runtime config")?;

    info!(
        symbol = %config.symbol,
        loop_interval_secs = config.loop_interval_secs,
        cache_capacity = config.cache_capacity,
        live = config.enable_live_trading,
        paper = config.enable_paper_trading,
        "Engine configuration"
    );

    // ── 2. Repository & seed data ────────────────────────────────────────
    let seed = match std::env::var("SEED_FILE") {
        Ok(path) => SeedData::load(&path)?,
        Err(_) => {
            warn!("SEED_FILE not set, starting with an empty repository");
            SeedData::default()
        }
    };
    let repo = Arc::new(InMemoryRepository::from_seed(&seed));

    // ── 3. Build shared state ────────────────────────────────────────────
    let loader = Arc::new(DefaultArtifactLoader::new(config.call_timeout())?);
    let features = Arc::new(SyntheticFeatureProvider::new(
        config.synthetic_start_price,
        config.synthetic_volatility,
    ));
    let state = Arc::new(AppState::new(
        config,
        repo,
        loader,
        features,
        Arc::new(LinearInferenceRunner),
    ));

    let promoted = state.register_seed_candidates(&seed.candidates).await;
    info!(candidates = seed.candidates.len(), promoted, "Seed candidates processed");
    match state.champions().await {
        Ok(champions) => {
            for c in champions {
                info!(tier = %c.tier, champion = ?c.name, uri = ?c.model_uri, "Champion");
            }
        }
        Err(e) => error!(error = %e, "Failed to list champions"),
    }

    // ── 4. Scheduler ─────────────────────────────────────────────────────
    let handle = state.scheduler.clone().start();

    // ── 5. Periodic status line ──────────────────────────────────────────
    let status_state = state.clone();
    let status_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
        interval.tick().await;
        loop {
            interval.tick().await;
            let snap = status_state.build_snapshot();
            info!(
                uptime_secs = snap.uptime_secs,
                ticks = snap.scheduler.ticks,
                signals = snap.scheduler.signals_committed,
                tick_failures = snap.scheduler.tick_failures,
                cache_entries = snap.cache.entries,
                cache_hits = snap.cache.hits,
                "Status"
            );
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping after the current tick");
    status_task.abort();

    if let Err(e) = handle.shutdown().await {
        error!(error = %e, "Scheduler task ended abnormally");
    }

    info!("Tiered Signals shut down complete.");
    Ok(())
}
