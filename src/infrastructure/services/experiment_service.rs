//! Experiment service
//!
//! Request-level helpers over the engine: assignment, conversion and scoring
//! for one visitor, plus the store failover policy.

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::experiment::RequestContext;
use crate::domain::persistence::UserStore;
use crate::domain::DomainError;
use crate::infrastructure::engine::{
    experiment_name_of, DelayedScore, EngineContext, Experiment, ExperimentCatalog, Trial,
    Visitor,
};

static GLOBAL: OnceCell<ExperimentService> = OnceCell::new();

// ============================================================================
// Request Types
// ============================================================================

/// The visitor a call is made for
#[derive(Debug, Clone)]
pub struct VisitorScope {
    pub user: Arc<dyn UserStore>,
    pub request: Option<Arc<dyn RequestContext>>,
}

impl VisitorScope {
    pub fn new(user: Arc<dyn UserStore>) -> Self {
        Self {
            user,
            request: None,
        }
    }

    pub fn with_request(mut self, request: Arc<dyn RequestContext>) -> Self {
        self.request = Some(request);
        self
    }
}

/// Alternative served to the visitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbTestResult {
    pub alternative: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

// ============================================================================
// Experiment Service
// ============================================================================

/// Entry point for request handlers
#[derive(Debug, Clone)]
pub struct ExperimentService {
    context: Arc<EngineContext>,
    catalog: ExperimentCatalog,
}

impl ExperimentService {
    pub fn new(context: Arc<EngineContext>) -> Self {
        let catalog = ExperimentCatalog::new(context.clone());
        Self { context, catalog }
    }

    /// Installs the process-wide default service; fails if one is installed
    pub fn install_global(service: ExperimentService) -> Result<(), DomainError> {
        GLOBAL
            .set(service)
            .map_err(|_| DomainError::configuration("A global experiment service is already installed"))
    }

    /// The process-wide default service, if installed
    pub fn global() -> Option<&'static ExperimentService> {
        GLOBAL.get()
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn catalog(&self) -> &ExperimentCatalog {
        &self.catalog
    }

    // ========================================================================
    // Visitor Operations
    // ========================================================================

    /// Serves an alternative of `name` to the visitor
    pub async fn ab_test(
        &self,
        visitor: &VisitorScope,
        name: &str,
        override_alternative: Option<&str>,
    ) -> Result<AbTestResult, DomainError> {
        let served: Result<AbTestResult, DomainError> = async {
            let experiment = self.catalog.find_or_create(name).await?;
            let mut trial = self.trial(visitor, experiment);
            let alternative = trial.choose(override_alternative).await?;

            Ok::<_, DomainError>(AbTestResult {
                alternative: alternative.name().to_string(),
                metadata: trial.metadata().map(str::to_string),
            })
        }
        .await;

        match served {
            Ok(result) => Ok(result),
            Err(e) => self.fail_over_to_control(name, override_alternative, e),
        }
    }

    /// Records a conversion for the visitor; unknown experiments count nothing
    pub async fn ab_finished(
        &self,
        visitor: &VisitorScope,
        name: &str,
        goal: Option<&str>,
        reset: Option<bool>,
    ) -> Result<bool, DomainError> {
        let finished: Result<bool, DomainError> = async {
            let Some(experiment) = self.catalog.find(name).await? else {
                return Ok(false);
            };

            self.trial(visitor, experiment).complete(goal, reset).await
        }
        .await;

        self.fail_over(finished, false)
    }

    /// Credits a score for the visitor once
    pub async fn ab_score(
        &self,
        visitor: &VisitorScope,
        name: &str,
        score: &str,
        value: i64,
    ) -> Result<bool, DomainError> {
        let scored: Result<bool, DomainError> = async {
            let Some(experiment) = self.catalog.find(name).await? else {
                return Ok(false);
            };

            self.trial(visitor, experiment).score(score, value).await
        }
        .await;

        self.fail_over(scored, false)
    }

    /// Stages a delayed score across every active experiment of the visitor
    /// that tracks `score`
    pub async fn add_delayed_score(
        &self,
        visitor: &VisitorScope,
        score: &str,
        label: &str,
        value: i64,
        ttl_seconds: u64,
    ) -> Result<usize, DomainError> {
        let staged: Result<usize, DomainError> = async {
            let active = Visitor::new(visitor.user.clone(), self.context.clone())
                .active_experiments()
                .await?;
            let names: BTreeSet<&str> = active.keys().map(|key| experiment_name_of(key)).collect();

            let mut trials = Vec::new();
            for name in names {
                if let Some(experiment) = self.catalog.find(name).await? {
                    if experiment.has_score(score) {
                        trials.push(self.trial(visitor, experiment));
                    }
                }
            }

            DelayedScore::new(self.context.clone())
                .add(score, label, &mut trials, value, ttl_seconds)
                .await
        }
        .await;

        self.fail_over(staged, 0)
    }

    /// Applies a staged delayed score
    pub async fn apply_delayed_score(&self, score: &str, label: &str) -> Result<usize, DomainError> {
        let applied = DelayedScore::new(self.context.clone()).apply(score, label).await;
        self.fail_over(applied, 0)
    }

    fn trial(&self, visitor: &VisitorScope, experiment: Experiment) -> Trial {
        let trial = Trial::new(visitor.user.clone(), experiment);

        match &visitor.request {
            Some(request) => trial.with_request(request.clone()),
            None => trial,
        }
    }

    // ========================================================================
    // Failover
    // ========================================================================

    fn should_fail_over(&self, error: &DomainError) -> bool {
        if !self.context.settings().db_failover || !error.is_store_unavailable() {
            return false;
        }

        warn!(error = %error, "Shared store unavailable, failing over");
        self.context.hooks().fire_on_db_failover(error);
        true
    }

    fn fail_over<T>(&self, outcome: Result<T, DomainError>, fallback: T) -> Result<T, DomainError> {
        match outcome {
            Err(e) if self.should_fail_over(&e) => Ok(fallback),
            other => other,
        }
    }

    /// Serves the configured control, or an explicit override when allowed.
    ///
    /// Experiments known only from the store have no control to fall back
    /// to, so the error propagates.
    fn fail_over_to_control(
        &self,
        name: &str,
        override_alternative: Option<&str>,
        error: DomainError,
    ) -> Result<AbTestResult, DomainError> {
        let settings = self.context.settings();
        let Some(definition) = settings.experiments.get(name) else {
            return Err(error);
        };

        if !self.should_fail_over(&error) {
            return Err(error);
        }

        let allowed_override = override_alternative.filter(|candidate| {
            settings.db_failover_allow_parameter_override
                && definition.alternatives.iter().any(|alt| alt.name() == *candidate)
        });

        let alternative = allowed_override
            .or_else(|| definition.control())
            .ok_or(error)?
            .to_string();

        let metadata = definition
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get(&alternative))
            .cloned();

        debug!(experiment = %name, alternative = %alternative, "Served failover alternative");

        Ok(AbTestResult {
            alternative,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::config::{EngineSettings, ParticipationLimit};
    use crate::domain::experiment::{ExperimentDefinition, RequestInfo};
    use crate::domain::store::MockStore;
    use crate::infrastructure::engine::Hooks;
    use crate::infrastructure::persistence::SessionUserStore;
    use crate::infrastructure::store::InMemoryStore;

    fn color() -> ExperimentDefinition {
        let metadata = BTreeMap::from([
            ("blue".to_string(), "#0000ff".to_string()),
            ("red".to_string(), "#ff0000".to_string()),
        ]);

        ExperimentDefinition::new(["blue", "red"])
            .with_goals(["purchase"])
            .with_scores(["qty"])
            .with_metadata(metadata)
    }

    fn settings() -> EngineSettings {
        EngineSettings::default()
            .with_cleanup_probability(0.0)
            .with_participation_limit(ParticipationLimit::All)
            .with_experiment("color", color())
    }

    fn create_service(settings: EngineSettings) -> ExperimentService {
        let context = EngineContext::new(Arc::new(InMemoryStore::new()), settings).unwrap();
        ExperimentService::new(Arc::new(context))
    }

    fn unavailable_store() -> MockStore {
        let mut store = MockStore::new();
        store
            .expect_pipeline()
            .returning(|_| Err(DomainError::store("connection refused")));
        store
            .expect_transaction()
            .returning(|_| Err(DomainError::store("connection refused")));
        store
    }

    fn failing_service(settings: EngineSettings, hooks: Hooks) -> ExperimentService {
        let context = EngineContext::new(Arc::new(unavailable_store()), settings)
            .unwrap()
            .with_hooks(hooks);
        ExperimentService::new(Arc::new(context))
    }

    fn visitor() -> VisitorScope {
        VisitorScope::new(Arc::new(SessionUserStore::new()))
    }

    #[tokio::test]
    async fn test_ab_test_serves_alternative_with_metadata() {
        let service = create_service(settings());
        let visitor = visitor();

        let first = service.ab_test(&visitor, "color", None).await.unwrap();
        let second = service.ab_test(&visitor, "color", None).await.unwrap();

        assert_eq!(first, second);
        let expected = if first.alternative == "blue" { "#0000ff" } else { "#ff0000" };
        assert_eq!(first.metadata.as_deref(), Some(expected));
    }

    #[tokio::test]
    async fn test_ab_test_unknown_experiment_is_not_found() {
        let service = create_service(settings());

        let result = service.ab_test(&visitor(), "missing", None).await;

        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_robot_request_gets_control() {
        let service = create_service(settings());
        let visitor = visitor().with_request(Arc::new(RequestInfo::new().with_user_agent("Googlebot")));

        let result = service.ab_test(&visitor, "color", None).await.unwrap();

        assert_eq!(result.alternative, "blue");
        assert!(visitor.user.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ab_finished_and_score() {
        let service = create_service(settings());
        let visitor = visitor();

        assert!(!service.ab_finished(&visitor, "color", None, None).await.unwrap());

        let served = service.ab_test(&visitor, "color", None).await.unwrap();
        assert!(service.ab_score(&visitor, "color", "qty", 4).await.unwrap());
        assert!(!service.ab_score(&visitor, "color", "qty", 4).await.unwrap());
        assert!(service
            .ab_finished(&visitor, "color", Some("purchase"), Some(false))
            .await
            .unwrap());

        let experiment = service.catalog().find("color").await.unwrap().unwrap();
        let alternative = experiment.alternative(&served.alternative).unwrap();
        assert_eq!(alternative.score("qty").await.unwrap(), 4);
        assert_eq!(alternative.completed_count(Some("purchase")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ab_finished_unknown_experiment_is_noop() {
        let service = create_service(settings());

        assert!(!service.ab_finished(&visitor(), "missing", None, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_delayed_score_round_trip() {
        let service = create_service(settings());
        let visitor = visitor();
        service.ab_test(&visitor, "color", Some("red")).await.unwrap();

        assert_eq!(
            service
                .add_delayed_score(&visitor, "qty", "label-1", 5, 60)
                .await
                .unwrap(),
            1
        );
        assert_eq!(service.apply_delayed_score("qty", "label-1").await.unwrap(), 1);
        assert_eq!(service.apply_delayed_score("qty", "label-1").await.unwrap(), 0);

        let experiment = service.catalog().find("color").await.unwrap().unwrap();
        assert_eq!(experiment.alternative("red").unwrap().score("qty").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_failover_serves_control_and_fires_hook() {
        let failovers = Arc::new(AtomicUsize::new(0));
        let counter = failovers.clone();
        let service = failing_service(
            settings().with_db_failover(true, false),
            Hooks::new().on_db_failover(move |error| {
                assert!(error.is_store_unavailable());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let result = assert_ok!(service.ab_test(&visitor(), "color", Some("red")).await);

        assert_eq!(result.alternative, "blue");
        assert_eq!(result.metadata.as_deref(), Some("#0000ff"));
        assert_eq!(failovers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failover_honours_allowed_override() {
        let service = failing_service(settings().with_db_failover(true, true), Hooks::default());

        let result = service.ab_test(&visitor(), "color", Some("red")).await.unwrap();
        assert_eq!(result.alternative, "red");

        let result = service.ab_test(&visitor(), "color", Some("purple")).await.unwrap();
        assert_eq!(result.alternative, "blue");
    }

    #[tokio::test]
    async fn test_failover_on_finish_and_score_counts_nothing() {
        let service = failing_service(settings().with_db_failover(true, false), Hooks::default());
        let visitor = visitor();

        assert!(!service.ab_finished(&visitor, "color", None, None).await.unwrap());
        assert!(!service.ab_score(&visitor, "color", "qty", 1).await.unwrap());
        assert_eq!(service.apply_delayed_score("qty", "label-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_errors_propagate_without_failover() {
        let service = failing_service(settings(), Hooks::default());

        let err = assert_err!(service.ab_test(&visitor(), "color", None).await);

        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_failover_requires_configured_experiment() {
        let service = failing_service(settings().with_db_failover(true, true), Hooks::default());

        let err = assert_err!(service.ab_test(&visitor(), "missing", None).await);

        assert!(err.is_store_unavailable());
    }
}
