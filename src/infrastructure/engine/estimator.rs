//! Monte Carlo estimate of each alternative's chance of being the best

use rand::RngCore;
use rand_distr::{Beta, Distribution};

/// Observed counts for one alternative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub participants: i64,
    pub completions: i64,
}

impl Observation {
    pub fn new(participants: i64, completions: i64) -> Self {
        Self {
            participants,
            completions,
        }
    }

    /// Beta(1 + completions, 1 + participants - completions)
    fn posterior(&self) -> Option<Beta<f64>> {
        let participants = self.participants.max(0);
        let completions = self.completions.clamp(0, participants);

        Beta::new(
            1.0 + completions as f64,
            1.0 + (participants - completions) as f64,
        )
        .ok()
    }
}

/// Bayesian winner estimator with a uniform prior
#[derive(Debug, Clone, Copy)]
pub struct BayesianEstimator {
    simulations: u32,
}

impl BayesianEstimator {
    pub fn new(simulations: u32) -> Self {
        Self {
            simulations: simulations.max(1),
        }
    }

    pub fn simulations(&self) -> u32 {
        self.simulations
    }

    /// Win probability per observation, in input order.
    ///
    /// Each round draws one rate per alternative; the first alternative
    /// holding the strictly highest draw wins the round.
    pub fn estimate(&self, observations: &[Observation], rng: &mut dyn RngCore) -> Vec<f64> {
        if observations.is_empty() {
            return Vec::new();
        }

        let posteriors: Vec<Option<Beta<f64>>> =
            observations.iter().map(Observation::posterior).collect();
        let mut wins = vec![0u32; observations.len()];

        for _ in 0..self.simulations {
            let mut winner = 0;
            let mut best = f64::NEG_INFINITY;

            for (index, posterior) in posteriors.iter().enumerate() {
                let draw = posterior.as_ref().map_or(0.0, |beta| beta.sample(&mut *rng));
                if draw > best {
                    best = draw;
                    winner = index;
                }
            }

            wins[winner] += 1;
        }

        let total = f64::from(self.simulations);
        wins.into_iter()
            .map(|count| f64::from(count) / total)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_no_data_is_a_coin_flip() {
        let estimator = BayesianEstimator::new(10_000);
        let mut rng = StdRng::seed_from_u64(42);

        let probabilities = estimator.estimate(
            &[Observation::new(0, 0), Observation::new(0, 0)],
            &mut rng,
        );

        assert_eq!(probabilities.len(), 2);
        for p in &probabilities {
            assert!((p - 0.5).abs() < 0.04, "probability was {}", p);
        }
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let estimator = BayesianEstimator::new(2_000);
        let mut rng = StdRng::seed_from_u64(1);

        let probabilities = estimator.estimate(
            &[
                Observation::new(100, 10),
                Observation::new(100, 12),
                Observation::new(100, 9),
            ],
            &mut rng,
        );

        let sum: f64 = probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear_leader_dominates() {
        let estimator = BayesianEstimator::new(5_000);
        let mut rng = StdRng::seed_from_u64(3);

        let probabilities = estimator.estimate(
            &[Observation::new(1_000, 100), Observation::new(1_000, 200)],
            &mut rng,
        );

        assert!(probabilities[1] > 0.99, "probabilities were {:?}", probabilities);
    }

    #[test]
    fn test_inconsistent_counts_are_clamped() {
        let estimator = BayesianEstimator::new(100);
        let mut rng = StdRng::seed_from_u64(5);

        let probabilities =
            estimator.estimate(&[Observation::new(1, 5), Observation::new(-3, 0)], &mut rng);
        assert_eq!(probabilities.len(), 2);
    }

    #[test]
    fn test_zero_simulations_runs_at_least_once() {
        assert_eq!(BayesianEstimator::new(0).simulations(), 1);
    }
}
