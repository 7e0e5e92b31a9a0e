//! Serialisable snapshots of an experiment and its counters

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::DomainError;

use super::experiment::Experiment;

/// Counters and derived rates for one alternative
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlternativeSummary {
    pub name: String,
    pub weight: f64,
    pub control: bool,
    pub winner: bool,
    pub participant_count: i64,
    pub completed_count: i64,
    pub unfinished_count: i64,
    pub conversion_rate: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub goal_completions: BTreeMap<String, i64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub scores: BTreeMap<String, i64>,
    /// Last stored win probabilities; the overall estimate uses the empty key
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub p_winner: BTreeMap<String, f64>,
}

/// Read model used by the CLI and dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSummary {
    pub name: String,
    pub version: i64,
    pub algorithm: String,
    pub resettable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    pub cohorting_disabled: bool,
    pub goals: Vec<String>,
    pub scores: Vec<String>,
    pub alternatives: Vec<AlternativeSummary>,
}

impl ExperimentSummary {
    /// Reads the experiment's state and counters from the shared store
    pub async fn load(experiment: &Experiment) -> Result<Self, DomainError> {
        let winner = experiment.winner().await?.map(|alt| alt.name().to_string());
        let stats = experiment.alternative_stats().await?;
        let control = experiment.control().map(|alt| alt.name().to_string());

        let alternatives = experiment
            .alternatives()
            .iter()
            .zip(stats)
            .map(|(alternative, stats)| AlternativeSummary {
                name: alternative.name().to_string(),
                weight: alternative.weight(),
                control: control.as_deref() == Some(alternative.name()),
                winner: winner.as_deref() == Some(alternative.name()),
                participant_count: stats.participant_count,
                completed_count: stats.completed_count,
                unfinished_count: stats.unfinished_count(),
                conversion_rate: stats.conversion_rate(None),
                goal_completions: stats.goal_completions,
                scores: stats.scores,
                p_winner: stats.p_winner,
            })
            .collect();

        Ok(Self {
            name: experiment.name().to_string(),
            version: experiment.version().await?,
            algorithm: experiment.algorithm().to_string(),
            resettable: experiment.resettable(),
            start_time: experiment.start_time().await?,
            winner,
            cohorting_disabled: experiment.cohorting_disabled().await?,
            goals: experiment.goals().to_vec(),
            scores: experiment.scores().to_vec(),
            alternatives,
        })
    }

    pub fn total_participants(&self) -> i64 {
        self.alternatives.iter().map(|alt| alt.participant_count).sum()
    }

    pub fn total_completions(&self) -> i64 {
        self.alternatives.iter().map(|alt| alt.completed_count).sum()
    }
}
