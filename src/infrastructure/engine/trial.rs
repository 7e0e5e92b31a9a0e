//! One visitor's assignment, completion and scoring lifecycle for one experiment

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};

use crate::domain::experiment::RequestContext;
use crate::domain::persistence::UserStore;
use crate::domain::store::StoreOp;
use crate::domain::DomainError;

use super::alternative::{completed_field, score_field, Alternative};
use super::experiment::Experiment;
use super::visitor::{finished_key, scored_key, Visitor};

/// A visitor's interaction with one experiment, alive for one request
pub struct Trial {
    visitor: Visitor,
    experiment: Experiment,
    alternative: Option<Alternative>,
    request: Option<Arc<dyn RequestContext>>,
}

impl fmt::Debug for Trial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trial")
            .field("experiment", &self.experiment.name())
            .field("alternative", &self.alternative.as_ref().map(Alternative::name))
            .field("request", &self.request)
            .finish()
    }
}

impl Trial {
    pub fn new(user: Arc<dyn UserStore>, experiment: Experiment) -> Self {
        let visitor = Visitor::new(user, experiment.context().clone());

        Self {
            visitor,
            experiment,
            alternative: None,
            request: None,
        }
    }

    /// Attaches the caller's request for eligibility checks
    pub fn with_request(mut self, request: Arc<dyn RequestContext>) -> Self {
        self.request = Some(request);
        self
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn visitor(&self) -> &Visitor {
        &self.visitor
    }

    pub fn request(&self) -> Option<&dyn RequestContext> {
        self.request.as_deref()
    }

    /// The resolved alternative, if `choose` ran or one was read back
    pub fn alternative(&self) -> Option<&Alternative> {
        self.alternative.as_ref()
    }

    /// Metadata attached to the resolved alternative
    pub fn metadata(&self) -> Option<&str> {
        self.alternative
            .as_ref()
            .and_then(|alt| self.experiment.metadata_for(alt.name()))
    }

    fn user(&self) -> &Arc<dyn UserStore> {
        self.visitor.user()
    }

    /// Assigns (or reads back) the visitor's alternative.
    ///
    /// An override naming a valid alternative always wins. Otherwise
    /// ineligible visitors get the control, a winner is returned as is, an
    /// existing assignment is reused and only then is a new alternative
    /// allocated and recorded. Only new allocations count as participation.
    pub async fn choose(&mut self, override_alternative: Option<&str>) -> Result<Alternative, DomainError> {
        let context = self.experiment.context().clone();
        let settings = context.settings();

        self.maybe_cleanup_in_background();

        let key = self.experiment.key().await?;
        self.visitor.cleanup_old_versions(&self.experiment, &key).await?;

        let mut run_trial_hook = settings.enabled;

        let chosen = match override_alternative.and_then(|name| self.experiment.alternative(name)) {
            Some(forced) => {
                let forced = forced.clone();
                let existing = self.user().get(&key).await?;

                // A pinned winner freezes participation, overrides included
                if settings.enabled
                    && !self.experiment.has_winner().await?
                    && !self.experiment.cohorting_disabled().await?
                    && self.is_eligible().await?
                {
                    match existing {
                        None => {
                            self.record(&key, &forced).await?;
                        }
                        Some(current) if settings.store_override && current != forced.name() => {
                            self.user().set(&key, forced.name()).await?;
                            forced.increment_participation().await?;
                            debug!(experiment = %self.experiment.name(), alternative = %forced.name(), "Override replaced assignment");
                        }
                        Some(_) => {}
                    }
                }

                forced
            }
            None => {
                if !settings.enabled || !self.is_eligible().await? {
                    self.control()?
                } else if let Some(winner) = self.experiment.winner().await? {
                    winner
                } else if let Some(existing) = self.existing_alternative(&key).await? {
                    existing
                } else if self.experiment.cohorting_disabled().await? {
                    run_trial_hook = false;
                    self.control()?
                } else {
                    let next = self.experiment.next_alternative().await?;
                    self.record(&key, &next).await?
                }
            }
        };

        self.alternative = Some(chosen.clone());

        if run_trial_hook {
            context.hooks().fire_on_trial(self);
        }

        Ok(chosen)
    }

    /// Records a conversion for the resolved alternative.
    ///
    /// Returns whether anything was counted. With `reset` unset, resettable
    /// experiments forget the assignment and others set the finished flag.
    pub async fn complete(&mut self, goal: Option<&str>, reset: Option<bool>) -> Result<bool, DomainError> {
        let context = self.experiment.context().clone();

        if !context.settings().enabled {
            return Ok(false);
        }

        if goal.is_some_and(|goal| !self.experiment.has_goal(goal)) {
            return Ok(false);
        }

        let key = self.experiment.key().await?;
        let Some(alternative) = self.resolve_alternative(&key).await? else {
            return Ok(false);
        };

        if !self.is_eligible().await? {
            return Ok(false);
        }

        let finished = finished_key(&key);
        if reset != Some(true) && self.user().get(&finished).await?.is_some() {
            return Ok(false);
        }

        context.hooks().fire_on_completion(self);

        let mut ops = vec![StoreOp::hincr_by(alternative.key(), completed_field(None), 1)];
        if goal.is_some() {
            ops.push(StoreOp::hincr_by(alternative.key(), completed_field(goal), 1));
        }
        context.store().transaction(&ops).await?;

        debug!(
            experiment = %self.experiment.name(),
            alternative = %alternative.name(),
            goal = goal.unwrap_or(""),
            "Completion recorded"
        );

        if reset.unwrap_or(self.experiment.resettable()) {
            self.reset().await?;
        } else {
            self.user().set(&finished, "true").await?;
        }

        Ok(true)
    }

    /// Credits a named score once per visitor.
    ///
    /// The counter increment and the scored flag are written in one
    /// transaction when the visitor store lives in the shared store.
    pub async fn score(&mut self, score: &str, value: i64) -> Result<bool, DomainError> {
        let context = self.experiment.context().clone();

        if !context.settings().enabled || !self.experiment.has_score(score) {
            return Ok(false);
        }

        let key = self.experiment.key().await?;
        let Some(alternative) = self.resolve_alternative(&key).await? else {
            return Ok(false);
        };

        if !self.is_eligible().await? {
            return Ok(false);
        }

        let flag = scored_key(&key, score);
        if self.user().get(&flag).await?.is_some() {
            return Ok(false);
        }

        let mut ops = vec![StoreOp::hincr_by(alternative.key(), score_field(score), value)];

        match self.user().transactional_set(&flag, "1") {
            Some(flag_ops) => {
                ops.extend(flag_ops);
                context.store().transaction(&ops).await?;
            }
            None => {
                context.store().transaction(&ops).await?;
                self.user().set(&flag, "1").await?;
            }
        }

        debug!(
            experiment = %self.experiment.name(),
            alternative = %alternative.name(),
            score = %score,
            value,
            "Score recorded"
        );

        Ok(true)
    }

    /// Forgets the visitor's assignment, finished flag and scored flags
    pub async fn reset(&mut self) -> Result<(), DomainError> {
        let key = self.experiment.key().await?;
        let scored_prefix = scored_key(&key, "");

        let mut keys: Vec<String> = self
            .user()
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(&scored_prefix))
            .collect();
        keys.push(key.clone());
        keys.push(finished_key(&key));

        self.user().delete(&keys).await?;
        self.alternative = None;

        Ok(())
    }

    /// Eligibility: not excluded, not a robot, not an ignored address,
    /// experiment started and participation cap respected
    pub async fn is_eligible(&self) -> Result<bool, DomainError> {
        let context = self.experiment.context();

        if let Some(request) = &self.request {
            if request.is_excluded() {
                return Ok(false);
            }

            if request.user_agent().is_some_and(|agent| context.is_robot(agent)) {
                return Ok(false);
            }

            if request.ip_address().is_some_and(|ip| context.is_ignored_ip(ip)) {
                return Ok(false);
            }
        }

        if self.experiment.start_time().await?.is_none() {
            return Ok(false);
        }

        self.visitor.within_participation_limit(&self.experiment).await
    }

    /// Resolves the alternative from the visitor store when not chosen yet
    pub(crate) async fn resolve_alternative(&mut self, key: &str) -> Result<Option<Alternative>, DomainError> {
        if self.alternative.is_none() {
            self.alternative = self.existing_alternative(key).await?;
        }

        Ok(self.alternative.clone())
    }

    async fn existing_alternative(&self, key: &str) -> Result<Option<Alternative>, DomainError> {
        let value = self.user().get(key).await?;
        Ok(value.and_then(|name| self.experiment.alternative(&name).cloned()))
    }

    fn control(&self) -> Result<Alternative, DomainError> {
        self.experiment.control().cloned().ok_or_else(|| {
            DomainError::configuration(format!(
                "Experiment '{}' has no alternatives",
                self.experiment.name()
            ))
        })
    }

    /// Writes the assignment and counts the participation once.
    ///
    /// When a concurrent request of the same visitor won the race, its
    /// alternative is returned instead.
    async fn record(&mut self, key: &str, alternative: &Alternative) -> Result<Alternative, DomainError> {
        if !self.user().set_if_absent(key, alternative.name()).await? {
            if let Some(existing) = self.existing_alternative(key).await? {
                return Ok(existing);
            }

            // The stored value no longer names an alternative
            self.user().set(key, alternative.name()).await?;
        }

        alternative.increment_participation().await?;
        self.alternative = Some(alternative.clone());
        self.experiment.context().hooks().fire_on_assignment(self);

        debug!(
            experiment = %self.experiment.name(),
            alternative = %alternative.name(),
            "Alternative assigned"
        );

        Ok(alternative.clone())
    }

    fn maybe_cleanup_in_background(&self) {
        let probability = self.experiment.context().settings().cleanup_probability;

        if probability <= 0.0 || rand::thread_rng().gen_range(0.0..1.0) >= probability {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let visitor = self.visitor.clone();
        runtime.spawn(async move {
            if let Err(e) = visitor.cleanup_old_experiments().await {
                warn!(error = %e, "Visitor cleanup failed");
            }
        });
    }
}
