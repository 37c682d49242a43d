// =============================================================================
// Tiered Signals — plan-tiered trading signal orchestration core
// =============================================================================

pub mod app_state;
pub mod artifact;
pub mod error;
pub mod features;
pub mod inference;
pub mod logging;
pub mod model_cache;
pub mod models;
pub mod outcome;
pub mod promotion;
pub mod quota;
pub mod registry;
pub mod repository;
pub mod runtime_config;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod test_support;

pub use error::{CoreError, CoreResult};
