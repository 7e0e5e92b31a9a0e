//! Experiment configuration, versioning and lifecycle against the shared store

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::experiment::{
    validate_alternatives, validate_experiment_name, validate_goals, validate_metadata,
    validate_scores, Algorithm, ExperimentDefinition, ExperimentValidationError,
    ResolvedDefinition,
};
use crate::domain::store::{StoreExt, StoreOp, StoreValue};
use crate::domain::DomainError;

use super::algorithms::{strategy_for, Arm};
use super::alternative::{alternative_key, p_winner_field, Alternative, AlternativeStats};
use super::context::EngineContext;
use super::estimator::{BayesianEstimator, Observation};

/// Set of every persisted experiment name
pub const EXPERIMENTS_KEY: &str = "experiments";
const START_TIMES_KEY: &str = "experiment_start_times";
const WINNERS_KEY: &str = "experiment_winner";

const RESETTABLE_FIELD: &str = "resettable";
const ALGORITHM_FIELD: &str = "algorithm";
const COHORTING_FIELD: &str = "cohorting_disabled";
const CALC_TIME_FIELD: &str = "calc_time";

fn configuration_key(name: &str) -> String {
    format!("experiment_configurations/{}", name)
}

fn alternatives_key(name: &str) -> String {
    format!("experiment_alternatives/{}", name)
}

fn goals_key(name: &str) -> String {
    format!("experiment_goals/{}", name)
}

fn scores_key(name: &str) -> String {
    format!("experiment_scores/{}", name)
}

fn metadata_key(name: &str) -> String {
    format!("experiment_metadata/{}", name)
}

fn version_key(name: &str) -> String {
    format!("experiment_versions/{}", name)
}

/// Alternative list entry as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredAlternative {
    name: String,
    weight: f64,
}

/// What `save` compares to decide whether running data is still valid
#[derive(Debug, PartialEq)]
struct PersistedLayout {
    alternatives: Vec<StoredAlternative>,
    goals: Vec<String>,
    scores: Vec<String>,
}

impl PersistedLayout {
    /// Same alternative names, goals and scores; weights may differ
    fn same_structure(&self, other: &PersistedLayout) -> bool {
        self.goals == other.goals
            && self.scores == other.scores
            && self
                .alternatives
                .iter()
                .map(|alt| &alt.name)
                .eq(other.alternatives.iter().map(|alt| &alt.name))
    }
}

/// Win probabilities for one goal (or overall when `goal` is `None`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinEstimate {
    pub goal: Option<String>,
    pub probabilities: Vec<(String, f64)>,
}

/// A named experiment bound to an engine context
#[derive(Clone)]
pub struct Experiment {
    name: String,
    alternatives: Vec<Alternative>,
    goals: Vec<String>,
    scores: Vec<String>,
    metadata: Option<BTreeMap<String, String>>,
    resettable: bool,
    algorithm: Algorithm,
    context: Arc<EngineContext>,
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("alternatives", &self.alternatives)
            .field("goals", &self.goals)
            .field("scores", &self.scores)
            .field("resettable", &self.resettable)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl Experiment {
    /// Builds an experiment from a configured definition, validating it
    pub fn from_definition(
        context: Arc<EngineContext>,
        name: &str,
        definition: &ExperimentDefinition,
    ) -> Result<Self, DomainError> {
        let resolved = definition.resolve(name)?;
        Ok(Self::from_resolved(context, name, resolved))
    }

    pub fn from_resolved(
        context: Arc<EngineContext>,
        name: &str,
        resolved: ResolvedDefinition,
    ) -> Self {
        let alternatives = resolved
            .alternatives
            .into_iter()
            .map(|(alternative, weight)| {
                Alternative::new(context.clone(), name, alternative, weight)
            })
            .collect();

        Self {
            name: name.to_string(),
            alternatives,
            goals: resolved.goals,
            scores: resolved.scores,
            metadata: resolved.metadata,
            resettable: resolved.resettable,
            algorithm: resolved.algorithm,
            context,
        }
    }

    /// Reads an unconfigured experiment back from the shared store
    pub async fn load(
        context: Arc<EngineContext>,
        name: &str,
    ) -> Result<Option<Self>, DomainError> {
        let replies = context
            .store()
            .pipeline(&[
                StoreOp::sismember(EXPERIMENTS_KEY, name),
                StoreOp::lrange(alternatives_key(name)),
                StoreOp::lrange(goals_key(name)),
                StoreOp::lrange(scores_key(name)),
                StoreOp::hget_all(configuration_key(name)),
                StoreOp::get(metadata_key(name)),
            ])
            .await?;

        let [exists, alternatives, goals, scores, configuration, metadata] =
            <[StoreValue; 6]>::try_from(replies)
                .map_err(|_| DomainError::store("Unexpected number of replies"))?;

        if !exists.into_bool()? {
            return Ok(None);
        }

        let alternatives = alternatives
            .into_strings()?
            .iter()
            .map(|entry| serde_json::from_str::<StoredAlternative>(entry))
            .collect::<Result<Vec<_>, _>>()?;

        let configuration = configuration.into_map()?;
        let algorithm = match configuration.get(ALGORITHM_FIELD) {
            Some(id) => id.parse::<Algorithm>()?,
            None => Algorithm::default(),
        };
        let metadata = match metadata.into_text()? {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };

        let resolved = ResolvedDefinition {
            alternatives: alternatives
                .into_iter()
                .map(|alternative| (alternative.name, alternative.weight))
                .collect(),
            goals: goals.into_strings()?,
            scores: scores.into_strings()?,
            metadata,
            resettable: configuration
                .get(RESETTABLE_FIELD)
                .is_none_or(|value| value != "false"),
            algorithm,
        };

        Ok(Some(Self::from_resolved(context, name, resolved)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    pub fn alternative(&self, name: &str) -> Option<&Alternative> {
        self.alternatives.iter().find(|alt| alt.name() == name)
    }

    pub fn has_alternative(&self, name: &str) -> bool {
        self.alternative(name).is_some()
    }

    /// The first alternative
    pub fn control(&self) -> Option<&Alternative> {
        self.alternatives.first()
    }

    pub fn goals(&self) -> &[String] {
        &self.goals
    }

    pub fn has_goal(&self, goal: &str) -> bool {
        self.goals.iter().any(|g| g == goal)
    }

    pub fn scores(&self) -> &[String] {
        &self.scores
    }

    pub fn has_score(&self, score: &str) -> bool {
        self.scores.iter().any(|s| s == score)
    }

    pub fn metadata(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.as_ref()
    }

    pub fn metadata_for(&self, alternative: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get(alternative))
            .map(String::as_str)
    }

    pub fn resettable(&self) -> bool {
        self.resettable
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        validate_experiment_name(&self.name)?;

        let names: Vec<&str> = self.alternatives.iter().map(Alternative::name).collect();
        validate_alternatives(&names)?;
        validate_goals(&self.goals)?;
        validate_scores(&self.scores)?;

        if let Some(metadata) = &self.metadata {
            validate_metadata(metadata, &names)?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Validates and persists the configuration.
    ///
    /// A new experiment is started unless `start_manually` is set. When the
    /// alternatives, goals or scores differ from what is persisted the
    /// experiment is reset first, unless `reset_manually` is set.
    pub async fn save(&self) -> Result<(), DomainError> {
        self.validate()?;

        let settings = self.context.settings();
        let store = self.context.store();

        match self.persisted_layout().await? {
            None => {
                store.transaction(&self.configuration_ops(&[])?).await?;

                if !settings.start_manually {
                    self.start().await?;
                }

                info!(experiment = %self.name, "Experiment created");
            }
            Some(persisted) if !persisted.same_structure(&self.layout()) => {
                if !settings.reset_manually {
                    self.reset().await?;
                }

                let stale: Vec<String> = persisted
                    .alternatives
                    .iter()
                    .filter(|old| !self.has_alternative(&old.name))
                    .map(|old| alternative_key(&self.name, &old.name))
                    .collect();

                store.transaction(&self.configuration_ops(&stale)?).await?;
                info!(experiment = %self.name, "Experiment configuration changed");
            }
            Some(persisted) if persisted != self.layout() => {
                // Reweighting only affects future allocations
                store.transaction(&self.configuration_ops(&[])?).await?;
                info!(experiment = %self.name, "Experiment weights changed");
            }
            Some(_) => {
                store.transaction(&self.settings_ops()?).await?;
                debug!(experiment = %self.name, "Experiment configuration unchanged");
            }
        }

        Ok(())
    }

    /// Whether the experiment is in the persisted experiment set
    pub async fn exists(&self) -> Result<bool, DomainError> {
        self.context
            .store()
            .sismember(EXPERIMENTS_KEY, &self.name)
            .await
    }

    fn layout(&self) -> PersistedLayout {
        PersistedLayout {
            alternatives: self.stored_alternatives(),
            goals: self.goals.clone(),
            scores: self.scores.clone(),
        }
    }

    fn stored_alternatives(&self) -> Vec<StoredAlternative> {
        self.alternatives
            .iter()
            .map(|alt| StoredAlternative {
                name: alt.name().to_string(),
                weight: alt.weight(),
            })
            .collect()
    }

    async fn persisted_layout(&self) -> Result<Option<PersistedLayout>, DomainError> {
        let replies = self
            .context
            .store()
            .pipeline(&[
                StoreOp::sismember(EXPERIMENTS_KEY, &self.name),
                StoreOp::lrange(alternatives_key(&self.name)),
                StoreOp::lrange(goals_key(&self.name)),
                StoreOp::lrange(scores_key(&self.name)),
            ])
            .await?;

        let [exists, alternatives, goals, scores] = <[StoreValue; 4]>::try_from(replies)
            .map_err(|_| DomainError::store("Unexpected number of replies"))?;

        if !exists.into_bool()? {
            return Ok(None);
        }

        let alternatives = alternatives
            .into_strings()?
            .iter()
            .map(|entry| serde_json::from_str(entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(PersistedLayout {
            alternatives,
            goals: goals.into_strings()?,
            scores: scores.into_strings()?,
        }))
    }

    /// Membership, lists, settings and metadata, written together
    fn configuration_ops(&self, stale_alternatives: &[String]) -> Result<Vec<StoreOp>, DomainError> {
        let alternatives = self
            .stored_alternatives()
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        let mut ops = vec![
            StoreOp::sadd(EXPERIMENTS_KEY, [self.name.as_str()]),
            StoreOp::del([
                alternatives_key(&self.name),
                goals_key(&self.name),
                scores_key(&self.name),
            ]),
            StoreOp::rpush(alternatives_key(&self.name), alternatives),
        ];

        if !self.goals.is_empty() {
            ops.push(StoreOp::rpush(goals_key(&self.name), self.goals.iter().cloned()));
        }

        if !self.scores.is_empty() {
            ops.push(StoreOp::rpush(scores_key(&self.name), self.scores.iter().cloned()));
        }

        if !stale_alternatives.is_empty() {
            ops.push(StoreOp::del(stale_alternatives.iter().cloned()));
        }

        ops.extend(self.settings_ops()?);
        Ok(ops)
    }

    fn settings_ops(&self) -> Result<Vec<StoreOp>, DomainError> {
        let configuration = configuration_key(&self.name);

        let mut ops = vec![
            StoreOp::hset(&configuration, RESETTABLE_FIELD, self.resettable.to_string()),
            StoreOp::hset(&configuration, ALGORITHM_FIELD, self.algorithm.as_str()),
        ];

        match &self.metadata {
            Some(metadata) => ops.push(StoreOp::set(
                metadata_key(&self.name),
                serde_json::to_string(metadata)?,
            )),
            None => ops.push(StoreOp::del([metadata_key(&self.name)])),
        }

        Ok(ops)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Stamps the start time; visitors are only eligible once started
    pub async fn start(&self) -> Result<(), DomainError> {
        let now = Utc::now().timestamp();

        self.context
            .store()
            .hset(START_TIMES_KEY, &self.name, &now.to_string())
            .await?;

        info!(experiment = %self.name, "Experiment started");
        Ok(())
    }

    pub async fn start_time(&self) -> Result<Option<DateTime<Utc>>, DomainError> {
        let value = self.context.store().hget(START_TIMES_KEY, &self.name).await?;

        Ok(value
            .and_then(|text| text.parse::<i64>().ok())
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0)))
    }

    pub async fn version(&self) -> Result<i64, DomainError> {
        let value = self.context.store().get(&version_key(&self.name)).await?;
        Ok(value.and_then(|text| text.parse().ok()).unwrap_or(0))
    }

    /// Visitor store key: the name, suffixed with the version after a reset
    pub async fn key(&self) -> Result<String, DomainError> {
        Ok(versioned_key(&self.name, self.version().await?))
    }

    async fn increment_version(&self) -> Result<i64, DomainError> {
        self.context
            .store()
            .incr_by(&version_key(&self.name), 1)
            .await
    }

    pub async fn winner(&self) -> Result<Option<Alternative>, DomainError> {
        let value = self.context.store().hget(WINNERS_KEY, &self.name).await?;
        Ok(value.and_then(|name| self.alternative(&name).cloned()))
    }

    pub async fn has_winner(&self) -> Result<bool, DomainError> {
        Ok(self.winner().await?.is_some())
    }

    /// Pins an alternative as the permanent choice
    pub async fn set_winner(&self, alternative: &str) -> Result<(), DomainError> {
        if !self.has_alternative(alternative) {
            return Err(DomainError::validation(
                ExperimentValidationError::UnknownAlternative(alternative.to_string()).to_string(),
            ));
        }

        self.context
            .store()
            .hset(WINNERS_KEY, &self.name, alternative)
            .await?;

        info!(experiment = %self.name, winner = %alternative, "Winner set");
        Ok(())
    }

    /// Reopens the experiment by clearing the winner
    pub async fn reset_winner(&self) -> Result<(), DomainError> {
        self.context.store().hdel(WINNERS_KEY, &self.name).await?;
        info!(experiment = %self.name, "Winner cleared");
        Ok(())
    }

    /// Wipes all counters and the winner, then moves to the next version
    pub async fn reset(&self) -> Result<i64, DomainError> {
        let hooks = self.context.hooks();
        hooks.fire_before_reset(self);

        let mut ops: Vec<StoreOp> = self.alternatives.iter().map(Alternative::reset_op).collect();
        ops.push(StoreOp::hdel(WINNERS_KEY, [self.name.as_str()]));
        ops.push(StoreOp::hdel(configuration_key(&self.name), [CALC_TIME_FIELD]));
        self.context.store().transaction(&ops).await?;

        hooks.fire_after_reset(self);

        let version = self.increment_version().await?;
        info!(experiment = %self.name, version, "Experiment reset");
        Ok(version)
    }

    /// Removes all persisted state, then moves to the next version
    pub async fn delete(&self) -> Result<i64, DomainError> {
        let hooks = self.context.hooks();
        hooks.fire_before_delete(self);

        let mut ops = vec![
            StoreOp::hdel(START_TIMES_KEY, [self.name.as_str()]),
            StoreOp::hdel(WINNERS_KEY, [self.name.as_str()]),
            StoreOp::srem(EXPERIMENTS_KEY, [self.name.as_str()]),
            StoreOp::del([
                alternatives_key(&self.name),
                goals_key(&self.name),
                scores_key(&self.name),
                metadata_key(&self.name),
                configuration_key(&self.name),
            ]),
        ];
        ops.extend(self.alternatives.iter().map(Alternative::reset_op));
        self.context.store().transaction(&ops).await?;

        hooks.fire_after_delete(self);

        let version = self.increment_version().await?;
        info!(experiment = %self.name, version, "Experiment deleted");
        Ok(version)
    }

    // ------------------------------------------------------------------------
    // Cohorting
    // ------------------------------------------------------------------------

    pub async fn cohorting_disabled(&self) -> Result<bool, DomainError> {
        let value = self
            .context
            .store()
            .hget(&configuration_key(&self.name), COHORTING_FIELD)
            .await?;

        Ok(value.as_deref() == Some("true"))
    }

    /// New visitors get the control and are not recorded
    pub async fn disable_cohorting(&self) -> Result<(), DomainError> {
        self.set_cohorting_disabled(true).await
    }

    pub async fn enable_cohorting(&self) -> Result<(), DomainError> {
        self.set_cohorting_disabled(false).await
    }

    async fn set_cohorting_disabled(&self, disabled: bool) -> Result<(), DomainError> {
        self.context
            .store()
            .hset(
                &configuration_key(&self.name),
                COHORTING_FIELD,
                &disabled.to_string(),
            )
            .await?;

        info!(experiment = %self.name, disabled, "Cohorting toggled");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Allocation and estimation
    // ------------------------------------------------------------------------

    /// Counter snapshots for every alternative, in alternative order
    pub async fn alternative_stats(&self) -> Result<Vec<AlternativeStats>, DomainError> {
        let ops: Vec<StoreOp> = self
            .alternatives
            .iter()
            .map(|alt| StoreOp::hget_all(alt.key()))
            .collect();

        self.context
            .store()
            .pipeline(&ops)
            .await?
            .into_iter()
            .map(|reply| Ok(AlternativeStats::from_fields(&reply.into_map()?)))
            .collect()
    }

    /// Picks an alternative for a new participant with the configured algorithm
    pub async fn next_alternative(&self) -> Result<Alternative, DomainError> {
        let [only] = self.alternatives.as_slice() else {
            return self.sample_alternative().await;
        };

        Ok(only.clone())
    }

    async fn sample_alternative(&self) -> Result<Alternative, DomainError> {
        if self.alternatives.is_empty() {
            return Err(DomainError::configuration(format!(
                "Experiment '{}' has no alternatives",
                self.name
            )));
        }

        let strategy = strategy_for(self.algorithm);

        let arms: Vec<Arm> = if strategy.needs_counters() {
            self.alternative_stats()
                .await?
                .iter()
                .zip(&self.alternatives)
                .map(|(stats, alt)| Arm {
                    weight: alt.weight(),
                    participants: stats.participant_count,
                    completions: stats.completed_count,
                })
                .collect()
        } else {
            self.alternatives
                .iter()
                .map(|alt| Arm::weighted(alt.weight()))
                .collect()
        };

        let index = strategy.choose(&arms, &mut rand::thread_rng());

        self.alternatives
            .get(index)
            .cloned()
            .ok_or_else(|| DomainError::internal("Allocation picked an unknown alternative"))
    }

    /// Runs the Bayesian estimator and stores each alternative's win probability.
    ///
    /// Experiments without goals get one overall estimate; experiments with
    /// goals get one independent estimate per goal.
    pub async fn estimate_winning_alternatives(&self) -> Result<Vec<WinEstimate>, DomainError> {
        let stats = self.alternative_stats().await?;
        let estimator = BayesianEstimator::new(self.context.settings().beta_probability_simulations);

        let goals: Vec<Option<&str>> = if self.goals.is_empty() {
            vec![None]
        } else {
            self.goals.iter().map(|goal| Some(goal.as_str())).collect()
        };

        let mut estimates = Vec::with_capacity(goals.len());
        let mut ops = Vec::new();

        for goal in goals {
            let observations: Vec<Observation> = stats
                .iter()
                .map(|s| Observation::new(s.participant_count, s.completed(goal)))
                .collect();

            let probabilities = estimator.estimate(&observations, &mut rand::thread_rng());

            for (alt, probability) in self.alternatives.iter().zip(&probabilities) {
                ops.push(StoreOp::hset(
                    alt.key(),
                    p_winner_field(goal),
                    probability.to_string(),
                ));
            }

            estimates.push(WinEstimate {
                goal: goal.map(str::to_string),
                probabilities: self
                    .alternatives
                    .iter()
                    .map(|alt| alt.name().to_string())
                    .zip(probabilities)
                    .collect(),
            });
        }

        self.context.store().pipeline(&ops).await?;
        debug!(experiment = %self.name, "Win probabilities estimated");

        Ok(estimates)
    }

    /// Re-estimates win probabilities once the recalculation interval passed.
    ///
    /// Returns `None` when the stored estimates are still fresh.
    pub async fn calc_winning_alternatives(&self) -> Result<Option<Vec<WinEstimate>>, DomainError> {
        let configuration = configuration_key(&self.name);
        let store = self.context.store();
        let now = Utc::now().timestamp();
        let interval = self.context.settings().winning_alternative_recalculation_interval;

        let last = store
            .hget(&configuration, CALC_TIME_FIELD)
            .await?
            .and_then(|text| text.parse::<i64>().ok());

        if let Some(last) = last {
            if now.saturating_sub(last) < i64::try_from(interval).unwrap_or(i64::MAX) {
                return Ok(None);
            }
        }

        let estimates = self.estimate_winning_alternatives().await?;
        store
            .hset(&configuration, CALC_TIME_FIELD, &now.to_string())
            .await?;

        Ok(Some(estimates))
    }
}

/// `name` for version 0, `name:version` afterwards
pub fn versioned_key(name: &str, version: i64) -> String {
    if version == 0 {
        name.to_string()
    } else {
        format!("{}:{}", name, version)
    }
}
