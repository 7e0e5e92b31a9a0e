//! Experiment validation utilities

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

use crate::domain::DomainError;

/// Maximum length for experiment names
pub const MAX_EXPERIMENT_NAME_LENGTH: usize = 100;

/// Tolerance used when checking that weights sum to one
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Validation errors for experiment definitions
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExperimentValidationError {
    #[error("Experiment name cannot be empty")]
    EmptyName,

    #[error("Experiment name exceeds maximum length of {0} characters")]
    NameTooLong(usize),

    #[error("Experiment name cannot contain ':'")]
    InvalidNameCharacter,

    #[error("Experiment must have at least 1 alternative")]
    NoAlternatives,

    #[error("Alternative name cannot be empty")]
    EmptyAlternativeName,

    #[error("Duplicate alternative: '{0}'")]
    DuplicateAlternative(String),

    #[error("Alternative '{alternative}' has invalid weight {weight}, expected 0.0..=1.0")]
    InvalidWeight { alternative: String, weight: f64 },

    #[error("Alternative weights must sum to 1.0, got {0}")]
    InvalidWeightSum(f64),

    #[error("Goal names cannot be empty")]
    EmptyGoal,

    #[error("Duplicate goal: '{0}'")]
    DuplicateGoal(String),

    #[error("Score names cannot be empty")]
    EmptyScore,

    #[error("Duplicate score: '{0}'")]
    DuplicateScore(String),

    #[error("Metadata keys must match alternatives (missing: {missing:?}, unexpected: {unexpected:?})")]
    MetadataMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Unknown algorithm '{0}'. Valid algorithms: weighted_sample, whiplash, block_randomization")]
    UnknownAlgorithm(String),

    #[error("'{0}' is not an alternative of this experiment")]
    UnknownAlternative(String),
}

impl From<ExperimentValidationError> for DomainError {
    fn from(err: ExperimentValidationError) -> Self {
        DomainError::configuration(err.to_string())
    }
}

/// Validate an experiment name
pub fn validate_experiment_name(name: &str) -> Result<(), ExperimentValidationError> {
    if name.is_empty() {
        return Err(ExperimentValidationError::EmptyName);
    }

    if name.len() > MAX_EXPERIMENT_NAME_LENGTH {
        return Err(ExperimentValidationError::NameTooLong(
            MAX_EXPERIMENT_NAME_LENGTH,
        ));
    }

    // ':' separates the name from the version suffix in visitor keys
    if name.contains(':') {
        return Err(ExperimentValidationError::InvalidNameCharacter);
    }

    Ok(())
}

/// Validate alternative names: at least one, all non-empty and unique
pub fn validate_alternatives<S: AsRef<str>>(names: &[S]) -> Result<(), ExperimentValidationError> {
    if names.is_empty() {
        return Err(ExperimentValidationError::NoAlternatives);
    }

    let mut seen = HashSet::new();

    for name in names {
        let name = name.as_ref();

        if name.is_empty() {
            return Err(ExperimentValidationError::EmptyAlternativeName);
        }

        if !seen.insert(name) {
            return Err(ExperimentValidationError::DuplicateAlternative(
                name.to_string(),
            ));
        }
    }

    Ok(())
}

/// Validate goal names
pub fn validate_goals(goals: &[String]) -> Result<(), ExperimentValidationError> {
    let mut seen = HashSet::new();

    for goal in goals {
        if goal.is_empty() {
            return Err(ExperimentValidationError::EmptyGoal);
        }

        if !seen.insert(goal.as_str()) {
            return Err(ExperimentValidationError::DuplicateGoal(goal.clone()));
        }
    }

    Ok(())
}

/// Validate score names
pub fn validate_scores(scores: &[String]) -> Result<(), ExperimentValidationError> {
    let mut seen = HashSet::new();

    for score in scores {
        if score.is_empty() {
            return Err(ExperimentValidationError::EmptyScore);
        }

        if !seen.insert(score.as_str()) {
            return Err(ExperimentValidationError::DuplicateScore(score.clone()));
        }
    }

    Ok(())
}

/// Validate that metadata keys are exactly the alternative names
pub fn validate_metadata<S: AsRef<str>>(
    metadata: &BTreeMap<String, String>,
    alternatives: &[S],
) -> Result<(), ExperimentValidationError> {
    let names: HashSet<&str> = alternatives.iter().map(AsRef::as_ref).collect();

    let mut missing: Vec<String> = names
        .iter()
        .filter(|name| !metadata.contains_key(**name))
        .map(|name| name.to_string())
        .collect();
    missing.sort();

    let unexpected: Vec<String> = metadata
        .keys()
        .filter(|key| !names.contains(key.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(ExperimentValidationError::MetadataMismatch {
            missing,
            unexpected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_experiment_names() {
        assert!(validate_experiment_name("link_color").is_ok());
        assert!(validate_experiment_name("Checkout Button").is_ok());
    }

    #[test]
    fn test_invalid_experiment_names() {
        assert_eq!(
            validate_experiment_name(""),
            Err(ExperimentValidationError::EmptyName)
        );
        assert_eq!(
            validate_experiment_name("color:2"),
            Err(ExperimentValidationError::InvalidNameCharacter)
        );
        assert_eq!(
            validate_experiment_name(&"x".repeat(101)),
            Err(ExperimentValidationError::NameTooLong(100))
        );
    }

    #[test]
    fn test_alternatives_validation() {
        assert!(validate_alternatives(&["blue", "red"]).is_ok());
        assert!(validate_alternatives(&["only"]).is_ok());

        assert_eq!(
            validate_alternatives::<&str>(&[]),
            Err(ExperimentValidationError::NoAlternatives)
        );
        assert_eq!(
            validate_alternatives(&["blue", ""]),
            Err(ExperimentValidationError::EmptyAlternativeName)
        );
        assert_eq!(
            validate_alternatives(&["blue", "red", "blue"]),
            Err(ExperimentValidationError::DuplicateAlternative("blue".into()))
        );
    }

    #[test]
    fn test_goals_and_scores_validation() {
        assert!(validate_goals(&["purchase".into(), "signup".into()]).is_ok());
        assert_eq!(
            validate_goals(&["".into()]),
            Err(ExperimentValidationError::EmptyGoal)
        );
        assert_eq!(
            validate_scores(&["revenue".into(), "revenue".into()]),
            Err(ExperimentValidationError::DuplicateScore("revenue".into()))
        );
    }

    #[test]
    fn test_metadata_must_match_alternatives() {
        let mut metadata = BTreeMap::new();
        metadata.insert("blue".to_string(), "#0000ff".to_string());
        metadata.insert("red".to_string(), "#ff0000".to_string());

        assert!(validate_metadata(&metadata, &["blue", "red"]).is_ok());

        let err = validate_metadata(&metadata, &["blue", "green"]).unwrap_err();
        assert_eq!(
            err,
            ExperimentValidationError::MetadataMismatch {
                missing: vec!["green".into()],
                unexpected: vec!["red".into()],
            }
        );
    }

    #[test]
    fn test_validation_error_converts_to_configuration_error() {
        let err: DomainError = ExperimentValidationError::UnknownAlgorithm("magic".into()).into();
        assert!(matches!(err, DomainError::Configuration { .. }));
    }
}
