//! Experiment definitions as supplied by configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::algorithm::Algorithm;
use super::validation::{
    validate_alternatives, validate_experiment_name, validate_goals, validate_metadata,
    validate_scores, ExperimentValidationError, WEIGHT_TOLERANCE,
};

// ============================================================================
// AlternativeDefinition
// ============================================================================

/// An alternative as written in configuration: either a bare name or a
/// name with an explicit weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlternativeDefinition {
    Named(String),
    Weighted { name: String, weight: f64 },
}

impl AlternativeDefinition {
    pub fn name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Weighted { name, .. } => name,
        }
    }

    pub fn weight(&self) -> Option<f64> {
        match self {
            Self::Named(_) => None,
            Self::Weighted { weight, .. } => Some(*weight),
        }
    }
}

impl From<&str> for AlternativeDefinition {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for AlternativeDefinition {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<(&str, f64)> for AlternativeDefinition {
    fn from((name, weight): (&str, f64)) -> Self {
        Self::Weighted {
            name: name.to_string(),
            weight,
        }
    }
}

// ============================================================================
// ExperimentDefinition
// ============================================================================

fn default_resettable() -> bool {
    true
}

/// Experiment definition from the configuration source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    pub alternatives: Vec<AlternativeDefinition>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub scores: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(default = "default_resettable")]
    pub resettable: bool,
    /// Algorithm identifier, resolved during validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

impl ExperimentDefinition {
    /// Create a definition with equally weighted alternatives
    pub fn new<I, A>(alternatives: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AlternativeDefinition>,
    {
        Self {
            alternatives: alternatives.into_iter().map(Into::into).collect(),
            goals: Vec::new(),
            scores: Vec::new(),
            metadata: None,
            resettable: true,
            algorithm: None,
        }
    }

    pub fn with_goals<I, S>(mut self, goals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.goals = goals.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scores<I, S>(mut self, scores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scores = scores.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_resettable(mut self, resettable: bool) -> Self {
        self.resettable = resettable;
        self
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    /// Name of the control (first) alternative
    pub fn control(&self) -> Option<&str> {
        self.alternatives.first().map(AlternativeDefinition::name)
    }

    /// Validate the definition and resolve weights and algorithm.
    pub fn resolve(&self, name: &str) -> Result<ResolvedDefinition, ExperimentValidationError> {
        validate_experiment_name(name)?;

        let names: Vec<&str> = self.alternatives.iter().map(|a| a.name()).collect();
        validate_alternatives(&names)?;
        validate_goals(&self.goals)?;
        validate_scores(&self.scores)?;

        if let Some(metadata) = &self.metadata {
            validate_metadata(metadata, &names)?;
        }

        let algorithm = match &self.algorithm {
            Some(id) => id.parse()?,
            None => Algorithm::default(),
        };

        Ok(ResolvedDefinition {
            alternatives: resolve_weights(&self.alternatives)?,
            goals: self.goals.clone(),
            scores: self.scores.clone(),
            metadata: self.metadata.clone(),
            resettable: self.resettable,
            algorithm,
        })
    }
}

/// Distribute weights so they sum to one.
///
/// Explicit weights are kept; the remainder is split evenly across the
/// alternatives without one.
pub fn resolve_weights(
    alternatives: &[AlternativeDefinition],
) -> Result<Vec<(String, f64)>, ExperimentValidationError> {
    let mut explicit_sum = 0.0;
    let mut unweighted = 0usize;

    for alternative in alternatives {
        match alternative.weight() {
            Some(weight) => {
                if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                    return Err(ExperimentValidationError::InvalidWeight {
                        alternative: alternative.name().to_string(),
                        weight,
                    });
                }
                explicit_sum += weight;
            }
            None => unweighted += 1,
        }
    }

    let remainder = 1.0 - explicit_sum;

    if remainder < -WEIGHT_TOLERANCE || (unweighted == 0 && remainder.abs() > WEIGHT_TOLERANCE) {
        return Err(ExperimentValidationError::InvalidWeightSum(explicit_sum));
    }

    let share = if unweighted > 0 {
        remainder.max(0.0) / unweighted as f64
    } else {
        0.0
    };

    Ok(alternatives
        .iter()
        .map(|alternative| {
            (
                alternative.name().to_string(),
                alternative.weight().unwrap_or(share),
            )
        })
        .collect())
}

/// A validated definition with concrete weights and algorithm
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDefinition {
    pub alternatives: Vec<(String, f64)>,
    pub goals: Vec<String>,
    pub scores: Vec<String>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub resettable: bool,
    pub algorithm: Algorithm,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight_sum(resolved: &ResolvedDefinition) -> f64 {
        resolved.alternatives.iter().map(|(_, w)| w).sum()
    }

    #[test]
    fn test_equal_split_by_default() {
        let resolved = ExperimentDefinition::new(["blue", "red", "green"])
            .resolve("color")
            .unwrap();

        for (_, weight) in &resolved.alternatives {
            assert!((weight - 1.0 / 3.0).abs() < 1e-9);
        }
        assert!((weight_sum(&resolved) - 1.0).abs() < 1e-9);
        assert_eq!(resolved.algorithm, Algorithm::WeightedSample);
        assert!(resolved.resettable);
    }

    #[test]
    fn test_remainder_split_across_unweighted() {
        let definition = ExperimentDefinition::new([
            AlternativeDefinition::from(("control", 0.5)),
            "a".into(),
            "b".into(),
        ]);
        let resolved = definition.resolve("split").unwrap();

        assert_eq!(resolved.alternatives[0], ("control".to_string(), 0.5));
        assert!((resolved.alternatives[1].1 - 0.25).abs() < 1e-9);
        assert!((resolved.alternatives[2].1 - 0.25).abs() < 1e-9);
        assert!((weight_sum(&resolved) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_weights_must_sum_to_one() {
        let definition = ExperimentDefinition::new([
            AlternativeDefinition::from(("a", 0.3)),
            AlternativeDefinition::from(("b", 0.3)),
        ]);
        assert!(matches!(
            definition.resolve("weights"),
            Err(ExperimentValidationError::InvalidWeightSum(_))
        ));

        let definition = ExperimentDefinition::new([
            AlternativeDefinition::from(("a", 0.8)),
            AlternativeDefinition::from(("b", 0.7)),
            "c".into(),
        ]);
        assert!(matches!(
            definition.resolve("weights"),
            Err(ExperimentValidationError::InvalidWeightSum(_))
        ));
    }

    #[test]
    fn test_out_of_range_weight() {
        let definition = ExperimentDefinition::new([
            AlternativeDefinition::from(("a", 1.5)),
            "b".into(),
        ]);
        assert!(matches!(
            definition.resolve("weights"),
            Err(ExperimentValidationError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_unknown_algorithm_fails_validation() {
        let definition = ExperimentDefinition::new(["a", "b"]).with_algorithm("random_walk");
        assert_eq!(
            definition.resolve("algo"),
            Err(ExperimentValidationError::UnknownAlgorithm(
                "random_walk".into()
            ))
        );
    }

    #[test]
    fn test_metadata_mismatch_fails_validation() {
        let mut metadata = BTreeMap::new();
        metadata.insert("a".to_string(), "first".to_string());

        let definition = ExperimentDefinition::new(["a", "b"]).with_metadata(metadata);
        assert!(matches!(
            definition.resolve("meta"),
            Err(ExperimentValidationError::MetadataMismatch { .. })
        ));
    }

    #[test]
    fn test_deserialize_mixed_alternatives() {
        let json = r#"{
            "alternatives": ["blue", {"name": "red", "weight": 0.2}],
            "goals": ["purchase"],
            "algorithm": "whiplash",
            "resettable": false
        }"#;

        let definition: ExperimentDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(definition.control(), Some("blue"));
        assert_eq!(definition.alternatives[1].weight(), Some(0.2));

        let resolved = definition.resolve("color").unwrap();
        assert_eq!(resolved.algorithm, Algorithm::Whiplash);
        assert!(!resolved.resettable);
        assert!((resolved.alternatives[0].1 - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_resettable_defaults_to_true_when_deserialized() {
        let definition: ExperimentDefinition =
            serde_json::from_str(r#"{"alternatives": ["a", "b"]}"#).unwrap();
        assert!(definition.resettable);
        assert!(definition.goals.is_empty());
    }
}
