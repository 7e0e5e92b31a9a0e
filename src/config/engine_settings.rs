//! Engine settings: behaviour switches and experiment definitions

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::experiment::ExperimentDefinition;

/// User agents treated as robots; blank agents count as robots too.
pub const DEFAULT_ROBOT_REGEX: &str = r"(?i)\b(?:bot|crawler|spider|slurp|archiver|facebookexternalhit|bingpreview|googlebot|yandex|baiduspider|duckduckbot|curl|wget|python-requests|headlesschrome|pingdom|uptimerobot|prerender)\b|^\W*$";

/// How many experiments one visitor may take part in at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipationLimit {
    /// Any number of experiments
    All,
    /// At most one experiment
    #[default]
    One,
    /// Any number, as long as at most one assignment is not the control
    Control,
}

/// Engine behaviour, threaded explicitly into every experiment and trial
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Global switch; when false every visitor sees the control
    pub enabled: bool,
    pub robot_regex: String,
    /// Exact addresses, or `/regex/` patterns
    pub ignore_ip_addresses: Vec<String>,
    pub allow_multiple_experiments: ParticipationLimit,
    /// Experiments are not started on first save
    pub start_manually: bool,
    /// Configuration changes do not reset the experiment
    pub reset_manually: bool,
    /// Let an override replace an existing, different assignment
    pub store_override: bool,
    /// Fall back to the control when the store is unreachable
    pub db_failover: bool,
    /// Honour an explicit override even while failing over
    pub db_failover_allow_parameter_override: bool,
    pub beta_probability_simulations: u32,
    /// Seconds between win probability recalculations
    pub winning_alternative_recalculation_interval: u64,
    pub persistence_namespace: String,
    pub persistence_expire_seconds: u64,
    /// Chance that a choose call sweeps stale visitor keys
    pub cleanup_probability: f64,
    pub experiments: HashMap<String, ExperimentDefinition>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            robot_regex: DEFAULT_ROBOT_REGEX.to_string(),
            ignore_ip_addresses: Vec::new(),
            allow_multiple_experiments: ParticipationLimit::default(),
            start_manually: false,
            reset_manually: false,
            store_override: false,
            db_failover: false,
            db_failover_allow_parameter_override: false,
            beta_probability_simulations: 10_000,
            winning_alternative_recalculation_interval: 60 * 60 * 24,
            persistence_namespace: "persistence".to_string(),
            persistence_expire_seconds: 60 * 60 * 24 * 365,
            cleanup_probability: 0.05,
            experiments: HashMap::new(),
        }
    }
}

impl EngineSettings {
    pub fn with_experiment(
        mut self,
        name: impl Into<String>,
        definition: ExperimentDefinition,
    ) -> Self {
        self.experiments.insert(name.into(), definition);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_participation_limit(mut self, limit: ParticipationLimit) -> Self {
        self.allow_multiple_experiments = limit;
        self
    }

    pub fn with_start_manually(mut self, start_manually: bool) -> Self {
        self.start_manually = start_manually;
        self
    }

    pub fn with_db_failover(mut self, failover: bool, allow_override: bool) -> Self {
        self.db_failover = failover;
        self.db_failover_allow_parameter_override = allow_override;
        self
    }

    pub fn with_ignored_ip(mut self, address: impl Into<String>) -> Self {
        self.ignore_ip_addresses.push(address.into());
        self
    }

    pub fn with_cleanup_probability(mut self, probability: f64) -> Self {
        self.cleanup_probability = probability;
        self
    }

    pub fn with_store_override(mut self, store_override: bool) -> Self {
        self.store_override = store_override;
        self
    }

    pub fn with_beta_probability_simulations(mut self, simulations: u32) -> Self {
        self.beta_probability_simulations = simulations;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.allow_multiple_experiments, ParticipationLimit::One);
        assert_eq!(settings.beta_probability_simulations, 10_000);
        assert!(settings.experiments.is_empty());
    }

    #[test]
    fn test_default_robot_regex_compiles_and_matches() {
        let regex = regex::Regex::new(DEFAULT_ROBOT_REGEX).unwrap();
        assert!(regex.is_match("Mozilla/5.0 (compatible; Googlebot/2.1)"));
        assert!(regex.is_match("curl/8.4.0"));
        assert!(regex.is_match(""));
        assert!(!regex.is_match(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) AppleWebKit/605.1.15 Safari/605.1.15"
        ));
    }

    #[test]
    fn test_participation_limit_deserialize() {
        let limit: ParticipationLimit = serde_json::from_str("\"control\"").unwrap();
        assert_eq!(limit, ParticipationLimit::Control);
    }
}
