//! Experiment domain module
//!
//! Configuration-level types for experiments: definitions as supplied by the
//! configuration source, allocation algorithm identifiers, validation rules
//! and the request capability consulted for eligibility.

mod algorithm;
mod context;
mod definition;
mod validation;

pub use algorithm::Algorithm;
pub use context::{RequestContext, RequestInfo};
pub use definition::{
    resolve_weights, AlternativeDefinition, ExperimentDefinition, ResolvedDefinition,
};
pub use validation::{
    validate_alternatives, validate_experiment_name, validate_goals, validate_metadata,
    validate_scores, ExperimentValidationError, MAX_EXPERIMENT_NAME_LENGTH, WEIGHT_TOLERANCE,
};
