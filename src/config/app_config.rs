use serde::Deserialize;

use super::engine_settings::EngineSettings;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Shared store connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// `in_memory` or `redis`
    pub backend: String,
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: "in_memory".to_string(),
            redis_url: None,
            key_prefix: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_with(Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with(environment: config::Environment) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(environment)
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.store.backend, "in_memory");
        assert!(config.engine.enabled);
    }

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let vars = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        AppConfig::environment().source(Some(vars))
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::load_with(environment(&[
            ("APP__STORE__BACKEND", "redis"),
            ("APP__ENGINE__BETA_PROBABILITY_SIMULATIONS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.store.backend, "redis");
        assert_eq!(config.engine.beta_probability_simulations, 250);
    }

    #[test]
    fn test_malformed_environment_value_fails_to_load() {
        let result = AppConfig::load_with(environment(&[(
            "APP__ENGINE__BETA_PROBABILITY_SIMULATIONS",
            "plenty",
        )]));

        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_from_toml_source() {
        let toml = r#"
            [logging]
            level = "debug"
            format = "json"

            [store]
            backend = "redis"
            redis_url = "redis://127.0.0.1:6379"
            key_prefix = "split"

            [engine]
            allow_multiple_experiments = "control"
            beta_probability_simulations = 500

            [engine.experiments.link_color]
            alternatives = ["blue", "red"]
            goals = ["purchase"]
        "#;

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.store.key_prefix.as_deref(), Some("split"));
        assert_eq!(config.engine.beta_probability_simulations, 500);

        let definition = config.engine.experiments.get("link_color").unwrap();
        assert_eq!(definition.control(), Some("blue"));
        assert_eq!(definition.goals, vec!["purchase".to_string()]);
    }
}
