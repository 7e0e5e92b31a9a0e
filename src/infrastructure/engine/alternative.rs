//! Per-alternative counters held in the shared store

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::store::{StoreExt, StoreOp};
use crate::domain::DomainError;

use super::context::EngineContext;

const PARTICIPANT_COUNT: &str = "participant_count";
const COMPLETED_COUNT: &str = "completed_count";
const SCORE_PREFIX: &str = "score:";
const P_WINNER: &str = "p_winner";

pub(crate) fn completed_field(goal: Option<&str>) -> String {
    match goal {
        Some(goal) => format!("{}:{}", COMPLETED_COUNT, goal),
        None => COMPLETED_COUNT.to_string(),
    }
}

pub(crate) fn score_field(score: &str) -> String {
    format!("{}{}", SCORE_PREFIX, score)
}

pub(crate) fn p_winner_field(goal: Option<&str>) -> String {
    match goal {
        Some(goal) => format!("{}:{}", P_WINNER, goal),
        None => P_WINNER.to_string(),
    }
}

/// Store key of an alternative's counter hash
pub(crate) fn alternative_key(experiment: &str, alternative: &str) -> String {
    format!("{}:{}", experiment, alternative)
}

/// One variant of an experiment.
///
/// Refers to its experiment by name; counters live in the hash
/// `"{experiment}:{alternative}"` and are created on first increment.
#[derive(Clone)]
pub struct Alternative {
    name: String,
    experiment_name: String,
    weight: f64,
    context: Arc<EngineContext>,
}

impl fmt::Debug for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alternative")
            .field("name", &self.name)
            .field("experiment_name", &self.experiment_name)
            .field("weight", &self.weight)
            .finish()
    }
}

impl PartialEq for Alternative {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.experiment_name == other.experiment_name
    }
}

impl Alternative {
    pub fn new(
        context: Arc<EngineContext>,
        experiment_name: impl Into<String>,
        name: impl Into<String>,
        weight: f64,
    ) -> Self {
        Self {
            name: name.into(),
            experiment_name: experiment_name.into(),
            weight,
            context,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn key(&self) -> String {
        alternative_key(&self.experiment_name, &self.name)
    }

    pub async fn participant_count(&self) -> Result<i64, DomainError> {
        self.counter(PARTICIPANT_COUNT).await
    }

    pub async fn completed_count(&self, goal: Option<&str>) -> Result<i64, DomainError> {
        self.counter(&completed_field(goal)).await
    }

    pub async fn score(&self, score: &str) -> Result<i64, DomainError> {
        self.counter(&score_field(score)).await
    }

    pub async fn unfinished_count(&self) -> Result<i64, DomainError> {
        Ok(self.stats().await?.unfinished_count())
    }

    /// Completions over participants; 0.0 without participants
    pub async fn conversion_rate(&self, goal: Option<&str>) -> Result<f64, DomainError> {
        Ok(self.stats().await?.conversion_rate(goal))
    }

    pub async fn increment_participation(&self) -> Result<i64, DomainError> {
        self.context
            .store()
            .hincr_by(&self.key(), PARTICIPANT_COUNT, 1)
            .await
    }

    /// Increments either the overall or the goal-specific completion series
    pub async fn increment_completion(&self, goal: Option<&str>) -> Result<i64, DomainError> {
        self.context
            .store()
            .hincr_by(&self.key(), &completed_field(goal), 1)
            .await
    }

    pub async fn increment_score(&self, score: &str, amount: i64) -> Result<i64, DomainError> {
        self.context
            .store()
            .hincr_by(&self.key(), &score_field(score), amount)
            .await
    }

    /// Last estimated probability of being the best alternative
    pub async fn p_winner(&self, goal: Option<&str>) -> Result<Option<f64>, DomainError> {
        let value = self
            .context
            .store()
            .hget(&self.key(), &p_winner_field(goal))
            .await?;

        Ok(value.and_then(|v| v.parse().ok()))
    }

    pub async fn set_p_winner(&self, goal: Option<&str>, probability: f64) -> Result<(), DomainError> {
        self.context
            .store()
            .hset(&self.key(), &p_winner_field(goal), &probability.to_string())
            .await
    }

    /// Reads every counter in one round trip
    pub async fn stats(&self) -> Result<AlternativeStats, DomainError> {
        let fields = self.context.store().hget_all(&self.key()).await?;
        Ok(AlternativeStats::from_fields(&fields))
    }

    /// Drops every counter
    pub async fn reset(&self) -> Result<(), DomainError> {
        self.context.store().del(&[self.key()]).await?;
        Ok(())
    }

    pub(crate) fn reset_op(&self) -> StoreOp {
        StoreOp::del([self.key()])
    }

    async fn counter(&self, field: &str) -> Result<i64, DomainError> {
        let value = self.context.store().hget(&self.key(), field).await?;
        parse_counter(&self.key(), field, value.as_deref())
    }
}

fn parse_counter(key: &str, field: &str, value: Option<&str>) -> Result<i64, DomainError> {
    match value {
        None => Ok(0),
        Some(text) => text.parse().map_err(|_| {
            DomainError::store(format!(
                "Counter '{}' of '{}' is not an integer: '{}'",
                field, key, text
            ))
        }),
    }
}

/// Snapshot of an alternative's counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlternativeStats {
    pub participant_count: i64,
    pub completed_count: i64,
    pub goal_completions: BTreeMap<String, i64>,
    pub scores: BTreeMap<String, i64>,
    /// Keyed by goal; the overall estimate uses the empty key
    pub p_winner: BTreeMap<String, f64>,
}

impl AlternativeStats {
    /// Builds a snapshot from the raw counter hash; unparsable fields are skipped
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let mut stats = Self::default();

        for (field, value) in fields {
            if field == PARTICIPANT_COUNT {
                stats.participant_count = value.parse().unwrap_or_default();
            } else if field == COMPLETED_COUNT {
                stats.completed_count = value.parse().unwrap_or_default();
            } else if let Some(goal) = field.strip_prefix("completed_count:") {
                if let Ok(count) = value.parse() {
                    stats.goal_completions.insert(goal.to_string(), count);
                }
            } else if let Some(score) = field.strip_prefix(SCORE_PREFIX) {
                if let Ok(total) = value.parse() {
                    stats.scores.insert(score.to_string(), total);
                }
            } else if field == P_WINNER {
                if let Ok(p) = value.parse() {
                    stats.p_winner.insert(String::new(), p);
                }
            } else if let Some(goal) = field.strip_prefix("p_winner:") {
                if let Ok(p) = value.parse() {
                    stats.p_winner.insert(goal.to_string(), p);
                }
            }
        }

        stats
    }

    pub fn completed(&self, goal: Option<&str>) -> i64 {
        match goal {
            Some(goal) => self.goal_completions.get(goal).copied().unwrap_or(0),
            None => self.completed_count,
        }
    }

    pub fn score(&self, score: &str) -> i64 {
        self.scores.get(score).copied().unwrap_or(0)
    }

    pub fn unfinished_count(&self) -> i64 {
        self.participant_count - self.completed_count
    }

    pub fn conversion_rate(&self, goal: Option<&str>) -> f64 {
        if self.participant_count == 0 {
            return 0.0;
        }

        self.completed(goal) as f64 / self.participant_count as f64
    }
}
