//! Shared engine state threaded into experiments and trials

use std::sync::Arc;

use regex::Regex;

use crate::config::EngineSettings;
use crate::domain::store::Store;
use crate::domain::DomainError;

use super::hooks::Hooks;

#[derive(Debug)]
enum IpMatcher {
    Exact(String),
    Pattern(Regex),
}

impl IpMatcher {
    fn parse(entry: &str) -> Result<Self, DomainError> {
        match entry
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(pattern) if !pattern.is_empty() => Regex::new(pattern)
                .map(Self::Pattern)
                .map_err(|e| {
                    DomainError::configuration(format!(
                        "Invalid ignored IP pattern '{}': {}",
                        entry, e
                    ))
                }),
            _ => Ok(Self::Exact(entry.to_string())),
        }
    }

    fn matches(&self, address: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == address,
            Self::Pattern(regex) => regex.is_match(address),
        }
    }
}

/// Store handle, settings and hooks for one engine instance
#[derive(Debug)]
pub struct EngineContext {
    store: Arc<dyn Store>,
    settings: EngineSettings,
    hooks: Hooks,
    robot_regex: Regex,
    ignored_ips: Vec<IpMatcher>,
}

impl EngineContext {
    /// Compiles the robot and ignored-address patterns up front
    pub fn new(store: Arc<dyn Store>, settings: EngineSettings) -> Result<Self, DomainError> {
        let robot_regex = Regex::new(&settings.robot_regex).map_err(|e| {
            DomainError::configuration(format!("Invalid robot pattern: {}", e))
        })?;

        let ignored_ips = settings
            .ignore_ip_addresses
            .iter()
            .map(|entry| IpMatcher::parse(entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            store,
            settings,
            hooks: Hooks::default(),
            robot_regex,
            ignored_ips,
        })
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn is_robot(&self, user_agent: &str) -> bool {
        self.robot_regex.is_match(user_agent)
    }

    pub fn is_ignored_ip(&self, address: &str) -> bool {
        self.ignored_ips.iter().any(|matcher| matcher.matches(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::store::InMemoryStore;

    fn context(settings: EngineSettings) -> Result<EngineContext, DomainError> {
        EngineContext::new(Arc::new(InMemoryStore::new()), settings)
    }

    #[test]
    fn test_ignored_ips_exact_and_pattern() {
        let settings = EngineSettings::default()
            .with_ignored_ip("10.0.0.1")
            .with_ignored_ip(r"/^192\.168\./");
        let context = context(settings).unwrap();

        assert!(context.is_ignored_ip("10.0.0.1"));
        assert!(!context.is_ignored_ip("10.0.0.10"));
        assert!(context.is_ignored_ip("192.168.4.20"));
        assert!(!context.is_ignored_ip("172.16.0.1"));
    }

    #[test]
    fn test_invalid_robot_pattern_is_configuration_error() {
        let settings = EngineSettings {
            robot_regex: "(unclosed".to_string(),
            ..Default::default()
        };

        let err = context(settings).unwrap_err();
        assert!(matches!(err, DomainError::Configuration { .. }));
    }

    #[test]
    fn test_robot_detection() {
        let context = context(EngineSettings::default()).unwrap();
        assert!(context.is_robot("Googlebot/2.1"));
        assert!(!context.is_robot("Mozilla/5.0 (X11; Linux x86_64) Firefox/130.0"));
    }
}
