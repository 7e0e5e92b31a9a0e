//! Allocation algorithm identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::validation::ExperimentValidationError;

/// Strategy used to pick an alternative for a new participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Static weighted random sampling
    #[default]
    WeightedSample,
    /// Adaptive multi-armed bandit
    Whiplash,
    /// Balances participant counts across alternatives
    BlockRandomization,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WeightedSample => "weighted_sample",
            Self::Whiplash => "whiplash",
            Self::BlockRandomization => "block_randomization",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ExperimentValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weighted_sample" | "weightedsample" => Ok(Self::WeightedSample),
            "whiplash" => Ok(Self::Whiplash),
            "block_randomization" | "blockrandomization" => Ok(Self::BlockRandomization),
            _ => Err(ExperimentValidationError::UnknownAlgorithm(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_algorithms() {
        assert_eq!("weighted_sample".parse(), Ok(Algorithm::WeightedSample));
        assert_eq!("Whiplash".parse(), Ok(Algorithm::Whiplash));
        assert_eq!(
            "block_randomization".parse(),
            Ok(Algorithm::BlockRandomization)
        );
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        assert_eq!(
            "epsilon_greedy".parse::<Algorithm>(),
            Err(ExperimentValidationError::UnknownAlgorithm(
                "epsilon_greedy".into()
            ))
        );
    }

    #[test]
    fn test_display_round_trips() {
        for algorithm in [
            Algorithm::WeightedSample,
            Algorithm::Whiplash,
            Algorithm::BlockRandomization,
        ] {
            assert_eq!(algorithm.to_string().parse(), Ok(algorithm));
        }
    }
}
