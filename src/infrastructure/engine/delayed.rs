//! Score credits staged under a label and applied later

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::persistence::UserStore;
use crate::domain::store::StoreOp;
use crate::domain::DomainError;

use super::alternative::score_field;
use super::context::EngineContext;
use super::trial::Trial;
use super::visitor::scored_key;

pub(crate) fn value_key(score: &str, label: &str) -> String {
    format!("delayed_score:{}:{}:value", score, label)
}

pub(crate) fn alternatives_key(score: &str, label: &str) -> String {
    format!("delayed_score:{}:{}:alternatives", score, label)
}

/// Stages and applies delayed score credits.
///
/// `add` stores the pending value together with the alternatives of every
/// eligible trial and flags each visitor as scored. `apply` claims the record
/// in one transaction before crediting, so replays and expired labels are
/// no-ops.
#[derive(Debug, Clone)]
pub struct DelayedScore {
    context: Arc<EngineContext>,
}

impl DelayedScore {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    /// Stages `value` for `score` under `label`, returning how many trials
    /// joined the record.
    ///
    /// Trials without an assignment, ineligible trials, trials whose
    /// experiment does not track the score and visitors already scored are
    /// skipped.
    pub async fn add(
        &self,
        score: &str,
        label: &str,
        trials: &mut [Trial],
        value: i64,
        ttl_seconds: u64,
    ) -> Result<usize, DomainError> {
        if !self.context.settings().enabled {
            return Ok(0);
        }

        let mut alternative_keys = Vec::new();
        let mut flags: Vec<(Arc<dyn UserStore>, String)> = Vec::new();

        for trial in trials.iter_mut() {
            if !trial.experiment().has_score(score) {
                continue;
            }

            let key = trial.experiment().key().await?;
            let Some(alternative) = trial.resolve_alternative(&key).await? else {
                continue;
            };

            if !trial.is_eligible().await? {
                continue;
            }

            let flag = scored_key(&key, score);
            let user = trial.visitor().user().clone();
            if user.get(&flag).await?.is_some() {
                continue;
            }

            alternative_keys.push(alternative.key());
            flags.push((user, flag));
        }

        if flags.is_empty() {
            return Ok(0);
        }

        let value_key = value_key(score, label);
        let alternatives_key = alternatives_key(score, label);

        let mut ops = vec![
            StoreOp::incr_by(value_key.as_str(), value),
            StoreOp::sadd(alternatives_key.as_str(), alternative_keys),
            StoreOp::expire(value_key.as_str(), ttl_seconds),
            StoreOp::expire(alternatives_key.as_str(), ttl_seconds),
        ];

        let mut deferred = Vec::new();
        for (user, flag) in &flags {
            match user.transactional_set(flag, "1") {
                Some(flag_ops) => ops.extend(flag_ops),
                None => deferred.push((user, flag)),
            }
        }

        self.context.store().transaction(&ops).await?;

        for (user, flag) in deferred {
            user.set(flag, "1").await?;
        }

        debug!(score = %score, label = %label, value, trials = flags.len(), "Delayed score staged");

        Ok(flags.len())
    }

    /// Credits the staged value to every recorded alternative, returning how
    /// many alternatives were credited. Unknown labels credit nothing.
    pub async fn apply(&self, score: &str, label: &str) -> Result<usize, DomainError> {
        let value_key = value_key(score, label);
        let alternatives_key = alternatives_key(score, label);

        let claim = self
            .context
            .store()
            .transaction(&[
                StoreOp::get(value_key.as_str()),
                StoreOp::smembers(alternatives_key.as_str()),
                StoreOp::del([value_key.as_str(), alternatives_key.as_str()]),
            ])
            .await?;

        let [value, alternatives, _] = <[_; 3]>::try_from(claim)
            .map_err(|_| DomainError::store("Unexpected reply count for delayed score claim"))?;

        let Some(value) = value.into_text()? else {
            return Ok(0);
        };
        let value: i64 = value.parse().map_err(|_| {
            DomainError::serialization(format!(
                "Delayed score '{}:{}' holds a non-integer value",
                score, label
            ))
        })?;

        let alternatives = alternatives.into_strings()?;
        if alternatives.is_empty() {
            return Ok(0);
        }

        let credits: Vec<StoreOp> = alternatives
            .iter()
            .map(|key| StoreOp::hincr_by(key.as_str(), score_field(score), value))
            .collect();
        self.context.store().transaction(&credits).await?;

        info!(
            score = %score,
            label = %label,
            value,
            alternatives = alternatives.len(),
            "Delayed score applied"
        );

        Ok(alternatives.len())
    }
}
