//! Store factory for runtime backend selection

use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreSettings;
use crate::domain::store::Store;
use crate::domain::DomainError;

use super::in_memory::InMemoryStore;
use super::redis::{RedisStore, RedisStoreConfig};

/// Supported store backends
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StoreType {
    /// Process-local store, for tests and single-process deployments
    #[default]
    InMemory,
    /// Redis store shared by every application process
    Redis,
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::InMemory => write!(f, "in_memory"),
            StoreType::Redis => write!(f, "redis"),
        }
    }
}

impl std::str::FromStr for StoreType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(StoreType::InMemory),
            "redis" => Ok(StoreType::Redis),
            _ => Err(DomainError::configuration(format!(
                "Unknown store type: {}. Valid types: in_memory, redis",
                s
            ))),
        }
    }
}

/// Configuration for the store factory
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub store_type: StoreType,
    /// Redis URL (required for Redis type)
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
    pub connection_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::InMemory,
            redis_url: None,
            key_prefix: None,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            store_type: StoreType::Redis,
            redis_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Builds the factory configuration from application settings
    pub fn from_settings(settings: &StoreSettings) -> Result<Self, DomainError> {
        Ok(Self {
            store_type: settings.backend.parse()?,
            redis_url: settings.redis_url.clone(),
            key_prefix: settings.key_prefix.clone(),
            ..Default::default()
        })
    }
}

/// Factory for creating store instances
#[derive(Debug, Default)]
pub struct StoreFactory;

impl StoreFactory {
    pub fn new() -> Self {
        Self
    }

    /// Creates a store instance based on configuration
    pub async fn create(&self, config: &StoreConfig) -> Result<Arc<dyn Store>, DomainError> {
        match config.store_type {
            StoreType::InMemory => Ok(Arc::new(InMemoryStore::new())),
            StoreType::Redis => {
                let url = config.redis_url.clone().ok_or_else(|| {
                    DomainError::configuration("Redis URL is required for Redis store type")
                })?;

                let mut redis_config =
                    RedisStoreConfig::new(url).with_connection_timeout(config.connection_timeout);

                if let Some(prefix) = &config.key_prefix {
                    redis_config = redis_config.with_key_prefix(prefix.clone());
                }

                let store = RedisStore::new(redis_config).await?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Creates an in-memory store
    pub fn create_in_memory(&self) -> Arc<dyn Store> {
        Arc::new(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::StoreExt;

    #[test]
    fn test_store_type_from_str() {
        assert_eq!("in_memory".parse::<StoreType>().unwrap(), StoreType::InMemory);
        assert_eq!("memory".parse::<StoreType>().unwrap(), StoreType::InMemory);
        assert_eq!("REDIS".parse::<StoreType>().unwrap(), StoreType::Redis);
        assert!("postgres".parse::<StoreType>().is_err());
    }

    #[test]
    fn test_config_from_settings() {
        let settings = StoreSettings {
            backend: "redis".to_string(),
            redis_url: Some("redis://localhost:6379".to_string()),
            key_prefix: Some("split".to_string()),
        };

        let config = StoreConfig::from_settings(&settings).unwrap();
        assert_eq!(config.store_type, StoreType::Redis);
        assert_eq!(config.key_prefix.as_deref(), Some("split"));
    }

    #[tokio::test]
    async fn test_factory_create_in_memory() {
        let store = StoreFactory::new()
            .create(&StoreConfig::in_memory())
            .await
            .unwrap();

        store.set("test", "value").await.unwrap();
        assert_eq!(store.get("test").await.unwrap(), Some("value".to_string()));
    }

    #[tokio::test]
    async fn test_factory_create_redis_missing_url() {
        let config = StoreConfig {
            store_type: StoreType::Redis,
            redis_url: None,
            ..Default::default()
        };

        let result = StoreFactory::new().create(&config).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_store_type_display() {
        assert_eq!(StoreType::InMemory.to_string(), "in_memory");
        assert_eq!(StoreType::Redis.to_string(), "redis");
    }
}
