//! Experiment engine
//!
//! Assignment, completion and scoring on top of the shared store, plus the
//! allocation strategies and the Bayesian winner estimator.

mod algorithms;
mod alternative;
mod catalog;
mod context;
mod delayed;
mod estimator;
mod experiment;
mod hooks;
mod summary;
mod trial;
mod visitor;

pub use algorithms::{
    strategy_for, AllocationStrategy, Arm, BlockRandomization, WeightedSample, Whiplash,
};
pub use alternative::{Alternative, AlternativeStats};
pub use catalog::ExperimentCatalog;
pub use context::EngineContext;
pub use delayed::DelayedScore;
pub use estimator::{BayesianEstimator, Observation};
pub use experiment::{versioned_key, Experiment, WinEstimate, EXPERIMENTS_KEY};
pub use hooks::{ExperimentHook, FailoverHook, Hooks, TrialHook};
pub use summary::{AlternativeSummary, ExperimentSummary};
pub use trial::Trial;
pub use visitor::{experiment_name_of, finished_key, scored_key, Visitor};
