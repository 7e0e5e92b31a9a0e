//! Optional callbacks invoked at fixed points of the experiment lifecycle

use std::fmt;
use std::sync::Arc;

use crate::domain::DomainError;

use super::experiment::Experiment;
use super::trial::Trial;

pub type ExperimentHook = Arc<dyn Fn(&Experiment) + Send + Sync>;
pub type TrialHook = Arc<dyn Fn(&Trial) + Send + Sync>;
pub type FailoverHook = Arc<dyn Fn(&DomainError) + Send + Sync>;

/// Callbacks consulted by experiments and trials. A missing hook is skipped.
#[derive(Clone, Default)]
pub struct Hooks {
    before_reset: Option<ExperimentHook>,
    after_reset: Option<ExperimentHook>,
    before_delete: Option<ExperimentHook>,
    after_delete: Option<ExperimentHook>,
    on_assignment: Option<TrialHook>,
    on_trial: Option<TrialHook>,
    on_completion: Option<TrialHook>,
    on_db_failover: Option<FailoverHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_reset", &self.before_reset.is_some())
            .field("after_reset", &self.after_reset.is_some())
            .field("before_delete", &self.before_delete.is_some())
            .field("after_delete", &self.after_delete.is_some())
            .field("on_assignment", &self.on_assignment.is_some())
            .field("on_trial", &self.on_trial.is_some())
            .field("on_completion", &self.on_completion.is_some())
            .field("on_db_failover", &self.on_db_failover.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_reset(mut self, hook: impl Fn(&Experiment) + Send + Sync + 'static) -> Self {
        self.before_reset = Some(Arc::new(hook));
        self
    }

    pub fn after_reset(mut self, hook: impl Fn(&Experiment) + Send + Sync + 'static) -> Self {
        self.after_reset = Some(Arc::new(hook));
        self
    }

    pub fn before_delete(mut self, hook: impl Fn(&Experiment) + Send + Sync + 'static) -> Self {
        self.before_delete = Some(Arc::new(hook));
        self
    }

    pub fn after_delete(mut self, hook: impl Fn(&Experiment) + Send + Sync + 'static) -> Self {
        self.after_delete = Some(Arc::new(hook));
        self
    }

    pub fn on_assignment(mut self, hook: impl Fn(&Trial) + Send + Sync + 'static) -> Self {
        self.on_assignment = Some(Arc::new(hook));
        self
    }

    pub fn on_trial(mut self, hook: impl Fn(&Trial) + Send + Sync + 'static) -> Self {
        self.on_trial = Some(Arc::new(hook));
        self
    }

    pub fn on_completion(mut self, hook: impl Fn(&Trial) + Send + Sync + 'static) -> Self {
        self.on_completion = Some(Arc::new(hook));
        self
    }

    pub fn on_db_failover(mut self, hook: impl Fn(&DomainError) + Send + Sync + 'static) -> Self {
        self.on_db_failover = Some(Arc::new(hook));
        self
    }

    pub(crate) fn fire_before_reset(&self, experiment: &Experiment) {
        if let Some(hook) = &self.before_reset {
            hook(experiment);
        }
    }

    pub(crate) fn fire_after_reset(&self, experiment: &Experiment) {
        if let Some(hook) = &self.after_reset {
            hook(experiment);
        }
    }

    pub(crate) fn fire_before_delete(&self, experiment: &Experiment) {
        if let Some(hook) = &self.before_delete {
            hook(experiment);
        }
    }

    pub(crate) fn fire_after_delete(&self, experiment: &Experiment) {
        if let Some(hook) = &self.after_delete {
            hook(experiment);
        }
    }

    pub(crate) fn fire_on_assignment(&self, trial: &Trial) {
        if let Some(hook) = &self.on_assignment {
            hook(trial);
        }
    }

    pub(crate) fn fire_on_trial(&self, trial: &Trial) {
        if let Some(hook) = &self.on_trial {
            hook(trial);
        }
    }

    pub(crate) fn fire_on_completion(&self, trial: &Trial) {
        if let Some(hook) = &self.on_completion {
            hook(trial);
        }
    }

    pub(crate) fn fire_on_db_failover(&self, error: &DomainError) {
        if let Some(hook) = &self.on_db_failover {
            hook(error);
        }
    }
}
