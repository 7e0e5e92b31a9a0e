//! Experiment lookup across configuration and the shared store

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::domain::store::StoreExt;
use crate::domain::DomainError;

use super::context::EngineContext;
use super::experiment::{Experiment, EXPERIMENTS_KEY};

/// Resolves experiments by name
#[derive(Debug, Clone)]
pub struct ExperimentCatalog {
    context: Arc<EngineContext>,
}

impl ExperimentCatalog {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    /// Loads a persisted experiment without consulting configuration
    pub async fn find(&self, name: &str) -> Result<Option<Experiment>, DomainError> {
        Experiment::load(self.context.clone(), name).await
    }

    /// Prefers the configured definition, falling back to persisted state.
    ///
    /// Fails with `NotFound` when the name is neither configured nor persisted.
    pub async fn find_or_initialize(&self, name: &str) -> Result<Experiment, DomainError> {
        if let Some(definition) = self.context.settings().experiments.get(name) {
            return Experiment::from_definition(self.context.clone(), name, definition);
        }

        self.find(name)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Experiment '{}' not found", name)))
    }

    /// Like [`find_or_initialize`](Self::find_or_initialize), saving configured experiments
    pub async fn find_or_create(&self, name: &str) -> Result<Experiment, DomainError> {
        let experiment = self.find_or_initialize(name).await?;

        if self.context.settings().experiments.contains_key(name) {
            experiment.save().await?;
        }

        debug!(experiment = %name, "Experiment resolved");
        Ok(experiment)
    }

    /// Every persisted experiment, sorted by name
    pub async fn all(&self) -> Result<Vec<Experiment>, DomainError> {
        let mut names = self.context.store().smembers(EXPERIMENTS_KEY).await?;
        names.sort();

        let experiments = try_join_all(names.iter().map(|name| self.find(name))).await?;
        Ok(experiments.into_iter().flatten().collect())
    }

    /// Every configured experiment, saved and sorted by name
    pub async fn create_configured(&self) -> Result<Vec<Experiment>, DomainError> {
        let mut names: Vec<&String> = self.context.settings().experiments.keys().collect();
        names.sort();

        let mut experiments = Vec::with_capacity(names.len());
        for name in names {
            experiments.push(self.find_or_create(name).await?);
        }

        Ok(experiments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::domain::experiment::ExperimentDefinition;
    use crate::infrastructure::store::InMemoryStore;

    fn catalog(settings: EngineSettings) -> ExperimentCatalog {
        let context = EngineContext::new(Arc::new(InMemoryStore::new()), settings).unwrap();
        ExperimentCatalog::new(Arc::new(context))
    }

    fn settings() -> EngineSettings {
        EngineSettings::default()
            .with_experiment("color", ExperimentDefinition::new(["blue", "red"]))
            .with_experiment("size", ExperimentDefinition::new(["small", "large"]))
    }

    #[tokio::test]
    async fn test_unknown_experiment_is_not_found() {
        let err = catalog(settings()).find_or_initialize("missing").await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_find_or_initialize_does_not_persist() {
        let catalog = catalog(settings());
        let experiment = catalog.find_or_initialize("color").await.unwrap();

        assert!(!experiment.exists().await.unwrap());
        assert!(catalog.find("color").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_or_create_persists_configured_experiment() {
        let catalog = catalog(settings());
        catalog.find_or_create("color").await.unwrap();

        let found = catalog.find("color").await.unwrap().unwrap();
        assert_eq!(found.control().unwrap().name(), "blue");
    }

    #[tokio::test]
    async fn test_all_lists_persisted_experiments() {
        let catalog = catalog(settings());
        assert!(catalog.all().await.unwrap().is_empty());

        catalog.create_configured().await.unwrap();

        let names: Vec<String> = catalog
            .all()
            .await
            .unwrap()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["color", "size"]);
    }

    #[tokio::test]
    async fn test_unconfigured_experiment_loads_from_store() {
        let store = Arc::new(InMemoryStore::new());
        let configured = EngineContext::new(store.clone(), settings()).unwrap();
        ExperimentCatalog::new(Arc::new(configured))
            .find_or_create("color")
            .await
            .unwrap();

        let bare = EngineContext::new(store, EngineSettings::default()).unwrap();
        let experiment = ExperimentCatalog::new(Arc::new(bare))
            .find_or_initialize("color")
            .await
            .unwrap();
        assert!(experiment.has_alternative("red"));
    }
}
