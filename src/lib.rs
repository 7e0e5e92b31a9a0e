//! PMP Experiments
//!
//! A/B testing engine over a shared key-value store:
//! - Weighted, bandit and block-randomized allocation
//! - At-most-once participation, completion and scoring per visitor
//! - Versioned resets and delayed score credits
//! - Bayesian estimation of each alternative's chance to win

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use tracing::info;

use domain::DomainError;
use infrastructure::engine::EngineContext;
use infrastructure::services::ExperimentService;
use infrastructure::store::{StoreConfig, StoreFactory};

/// Connects the configured store and builds the experiment service
pub async fn create_experiment_service(config: &AppConfig) -> Result<ExperimentService, DomainError> {
    let store_config = StoreConfig::from_settings(&config.store)?;
    let store = StoreFactory::new().create(&store_config).await?;

    info!(
        backend = %store_config.store_type,
        experiments = config.engine.experiments.len(),
        "Experiment engine ready"
    );

    let context = EngineContext::new(store, config.engine.clone())?;
    Ok(ExperimentService::new(Arc::new(context)))
}
