//! A visitor's assignments and their maintenance

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::ParticipationLimit;
use crate::domain::persistence::UserStore;
use crate::domain::DomainError;

use super::context::EngineContext;
use super::experiment::Experiment;

const FINISHED_SUFFIX: &str = ":finished";
const SCORED_INFIX: &str = ":scored:";

pub fn finished_key(experiment_key: &str) -> String {
    format!("{}{}", experiment_key, FINISHED_SUFFIX)
}

pub fn scored_key(experiment_key: &str, score: &str) -> String {
    format!("{}{}{}", experiment_key, SCORED_INFIX, score)
}

/// Experiment key a visitor key belongs to (`color:2:finished` -> `color:2`)
pub fn base_key(key: &str) -> &str {
    if let Some((base, _)) = key.split_once(SCORED_INFIX) {
        return base;
    }

    key.strip_suffix(FINISHED_SUFFIX).unwrap_or(key)
}

/// Experiment name of a visitor key; names never contain ':'
pub fn experiment_name_of(key: &str) -> &str {
    let base = base_key(key);
    base.split_once(':').map_or(base, |(name, _)| name)
}

fn is_assignment_key(key: &str) -> bool {
    base_key(key) == key
}

/// One visitor's view over the engine
#[derive(Clone)]
pub struct Visitor {
    user: Arc<dyn UserStore>,
    context: Arc<EngineContext>,
}

impl fmt::Debug for Visitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Visitor").field("user", &self.user).finish()
    }
}

impl Visitor {
    pub fn new(user: Arc<dyn UserStore>, context: Arc<EngineContext>) -> Self {
        Self { user, context }
    }

    pub fn user(&self) -> &Arc<dyn UserStore> {
        &self.user
    }

    /// Current assignments: experiment key to alternative name
    pub async fn active_experiments(&self) -> Result<BTreeMap<String, String>, DomainError> {
        let keys: Vec<String> = self
            .user
            .keys()
            .await?
            .into_iter()
            .filter(|key| is_assignment_key(key))
            .collect();

        let values = self.user.multi_get(&keys).await?;

        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|alternative| (key, alternative)))
            .collect())
    }

    /// Removes keys of earlier versions of `experiment`
    pub async fn cleanup_old_versions(
        &self,
        experiment: &Experiment,
        current_key: &str,
    ) -> Result<usize, DomainError> {
        let stale: Vec<String> = self
            .user
            .keys()
            .await?
            .into_iter()
            .filter(|key| {
                experiment_name_of(key) == experiment.name() && base_key(key) != current_key
            })
            .collect();

        if !stale.is_empty() {
            self.user.delete(&stale).await?;
            debug!(experiment = %experiment.name(), removed = stale.len(), "Removed stale visitor keys");
        }

        Ok(stale.len())
    }

    /// Removes keys of experiments that were deleted, have a winner or are
    /// not started
    pub async fn cleanup_old_experiments(&self) -> Result<usize, DomainError> {
        let keys = self.user.keys().await?;
        let names: BTreeSet<&str> = keys.iter().map(|key| experiment_name_of(key)).collect();
        let mut obsolete = BTreeSet::new();

        for name in names {
            let keep = match Experiment::load(self.context.clone(), name).await? {
                Some(experiment) => {
                    !experiment.has_winner().await? && experiment.start_time().await?.is_some()
                }
                None => false,
            };

            if !keep {
                obsolete.insert(name);
            }
        }

        let stale: Vec<String> = keys
            .iter()
            .filter(|key| obsolete.contains(experiment_name_of(key)))
            .cloned()
            .collect();

        if !stale.is_empty() {
            self.user.delete(&stale).await?;
            debug!(removed = stale.len(), "Removed visitor keys of finished experiments");
        }

        Ok(stale.len())
    }

    /// Whether joining `experiment` keeps the visitor within the configured cap
    pub async fn within_participation_limit(
        &self,
        experiment: &Experiment,
    ) -> Result<bool, DomainError> {
        let limit = self.context.settings().allow_multiple_experiments;

        if limit == ParticipationLimit::All {
            return Ok(true);
        }

        let others: Vec<(String, String)> = self
            .active_experiments()
            .await?
            .into_iter()
            .filter(|(key, _)| experiment_name_of(key) != experiment.name())
            .collect();

        if limit == ParticipationLimit::One {
            return Ok(others.is_empty());
        }

        // Control: any number of experiments while every other assignment is a control
        for (key, alternative) in &others {
            let Some(other) = Experiment::load(self.context.clone(), experiment_name_of(key)).await?
            else {
                continue;
            };

            if other.control().is_some_and(|control| control.name() != alternative) {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::domain::experiment::ExperimentDefinition;
    use crate::infrastructure::persistence::SessionUserStore;
    use crate::infrastructure::store::InMemoryStore;

    fn context(limit: ParticipationLimit) -> Arc<EngineContext> {
        let settings = EngineSettings::default().with_participation_limit(limit);
        Arc::new(EngineContext::new(Arc::new(InMemoryStore::new()), settings).unwrap())
    }

    async fn saved(context: &Arc<EngineContext>, name: &str) -> Experiment {
        let experiment = Experiment::from_definition(
            context.clone(),
            name,
            &ExperimentDefinition::new(["control", "variant"]),
        )
        .unwrap();
        experiment.save().await.unwrap();
        experiment
    }

    #[test]
    fn test_key_helpers() {
        assert_eq!(finished_key("color:2"), "color:2:finished");
        assert_eq!(scored_key("color", "revenue"), "color:scored:revenue");
        assert_eq!(base_key("color:2:finished"), "color:2");
        assert_eq!(base_key("color:scored:revenue"), "color");
        assert_eq!(base_key("color:3"), "color:3");
        assert_eq!(experiment_name_of("color:3:scored:qty"), "color");
        assert_eq!(experiment_name_of("color"), "color");
    }

    #[tokio::test]
    async fn test_active_experiments_skip_flags() {
        let user = Arc::new(SessionUserStore::new());
        user.set("color", "blue").await.unwrap();
        user.set("color:finished", "true").await.unwrap();
        user.set("size:1", "large").await.unwrap();
        user.set("size:1:scored:qty", "1").await.unwrap();

        let visitor = Visitor::new(user, context(ParticipationLimit::All));
        let active = visitor.active_experiments().await.unwrap();

        assert_eq!(active.len(), 2);
        assert_eq!(active.get("color").map(String::as_str), Some("blue"));
        assert_eq!(active.get("size:1").map(String::as_str), Some("large"));
    }

    #[tokio::test]
    async fn test_cleanup_old_versions_keeps_current_key() {
        let context = context(ParticipationLimit::All);
        let experiment = saved(&context, "color").await;
        let user = Arc::new(SessionUserStore::new());
        user.set("color", "control").await.unwrap();
        user.set("color:finished", "true").await.unwrap();
        user.set("color:1", "variant").await.unwrap();
        user.set("colorful", "x").await.unwrap();

        let visitor = Visitor::new(user.clone(), context);
        assert_eq!(visitor.cleanup_old_versions(&experiment, "color:1").await.unwrap(), 2);

        let mut keys = user.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["color:1", "colorful"]);
    }

    #[tokio::test]
    async fn test_cleanup_old_experiments() {
        let context = context(ParticipationLimit::All);
        saved(&context, "running").await;
        let won = saved(&context, "won").await;
        won.set_winner("variant").await.unwrap();

        let user = Arc::new(SessionUserStore::new());
        user.set("running", "control").await.unwrap();
        user.set("won", "variant").await.unwrap();
        user.set("deleted", "control").await.unwrap();
        user.set("deleted:finished", "true").await.unwrap();

        let visitor = Visitor::new(user.clone(), context);
        assert_eq!(visitor.cleanup_old_experiments().await.unwrap(), 3);
        assert_eq!(user.keys().await.unwrap(), vec!["running".to_string()]);
    }

    #[tokio::test]
    async fn test_limit_one_blocks_second_experiment() {
        let context = context(ParticipationLimit::One);
        let first = saved(&context, "first").await;
        let second = saved(&context, "second").await;
        let user = Arc::new(SessionUserStore::new());
        let visitor = Visitor::new(user.clone(), context);

        assert!(visitor.within_participation_limit(&second).await.unwrap());

        user.set("first", "control").await.unwrap();
        assert!(visitor.within_participation_limit(&first).await.unwrap());
        assert!(!visitor.within_participation_limit(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_limit_control_allows_control_assignments() {
        let context = context(ParticipationLimit::Control);
        saved(&context, "first").await;
        let second = saved(&context, "second").await;
        let user = Arc::new(SessionUserStore::new());
        let visitor = Visitor::new(user.clone(), context);

        user.set("first", "control").await.unwrap();
        assert!(visitor.within_participation_limit(&second).await.unwrap());

        user.set("first", "variant").await.unwrap();
        assert!(!visitor.within_participation_limit(&second).await.unwrap());
    }
}
