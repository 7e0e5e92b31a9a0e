//! Allocation strategies choosing the alternative for a new participant

use std::fmt::Debug;

use rand::{Rng, RngCore};
use rand_distr::{Beta, Distribution};

use crate::domain::experiment::Algorithm;

/// What a strategy may look at when choosing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arm {
    pub weight: f64,
    pub participants: i64,
    pub completions: i64,
}

impl Arm {
    pub fn weighted(weight: f64) -> Self {
        Self {
            weight,
            participants: 0,
            completions: 0,
        }
    }
}

/// Picks an index into a non-empty slice of arms
pub trait AllocationStrategy: Send + Sync + Debug {
    /// Whether the strategy reads participation and completion counters
    fn needs_counters(&self) -> bool;

    fn choose(&self, arms: &[Arm], rng: &mut dyn RngCore) -> usize;
}

/// Static weighted random sampling over half-open cumulative intervals
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedSample;

impl AllocationStrategy for WeightedSample {
    fn needs_counters(&self) -> bool {
        false
    }

    fn choose(&self, arms: &[Arm], rng: &mut dyn RngCore) -> usize {
        let draw: f64 = rng.gen_range(0.0..1.0);
        let mut cumulative = 0.0;

        for (index, arm) in arms.iter().enumerate() {
            cumulative += arm.weight;
            if draw < cumulative {
                return index;
            }
        }

        // Rounding left the total just below 1.0
        arms.len().saturating_sub(1)
    }
}

/// Thompson-sampling bandit.
///
/// Each arm's conversion rate is drawn from Beta(1 + completions,
/// 1 + failures); the arm with the highest draw has the lowest sampled
/// regret. Arms with few samples have wide posteriors and keep getting
/// explored; with no data every arm is equally likely.
#[derive(Debug, Clone, Copy, Default)]
pub struct Whiplash;

impl Whiplash {
    fn sample(arm: &Arm, rng: &mut dyn RngCore) -> f64 {
        let participants = arm.participants.max(0);
        let completions = arm.completions.clamp(0, participants);
        let alpha = 1.0 + completions as f64;
        let beta = 1.0 + (participants - completions) as f64;

        match Beta::new(alpha, beta) {
            Ok(distribution) => distribution.sample(&mut *rng),
            Err(_) => rng.gen_range(0.0..1.0),
        }
    }
}

impl AllocationStrategy for Whiplash {
    fn needs_counters(&self) -> bool {
        true
    }

    fn choose(&self, arms: &[Arm], rng: &mut dyn RngCore) -> usize {
        let samples: Vec<f64> = arms.iter().map(|arm| Self::sample(arm, rng)).collect();
        let best = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let leaders: Vec<usize> = samples
            .iter()
            .enumerate()
            .filter(|(_, sample)| **sample >= best)
            .map(|(index, _)| index)
            .collect();

        pick(&leaders, rng)
    }
}

/// Balances group sizes by choosing among the least-populated arms
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockRandomization;

impl AllocationStrategy for BlockRandomization {
    fn needs_counters(&self) -> bool {
        true
    }

    fn choose(&self, arms: &[Arm], rng: &mut dyn RngCore) -> usize {
        let fewest = arms.iter().map(|arm| arm.participants).min().unwrap_or(0);

        let candidates: Vec<usize> = arms
            .iter()
            .enumerate()
            .filter(|(_, arm)| arm.participants == fewest)
            .map(|(index, _)| index)
            .collect();

        pick(&candidates, rng)
    }
}

fn pick(candidates: &[usize], rng: &mut dyn RngCore) -> usize {
    match candidates.len() {
        0 => 0,
        1 => candidates[0],
        n => candidates[rng.gen_range(0..n)],
    }
}

/// Resolves the strategy registered for an algorithm identifier
pub fn strategy_for(algorithm: Algorithm) -> &'static dyn AllocationStrategy {
    match algorithm {
        Algorithm::WeightedSample => &WeightedSample,
        Algorithm::Whiplash => &Whiplash,
        Algorithm::BlockRandomization => &BlockRandomization,
    }
}
