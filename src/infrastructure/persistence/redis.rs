//! Durable visitor store kept in the shared store

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EngineSettings;
use crate::domain::persistence::UserStore;
use crate::domain::store::{Store, StoreExt, StoreOp};
use crate::domain::DomainError;

/// Derives the storage key suffix from an external visitor identity
pub type LookupFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Visitor store holding one hash per visitor, `"{namespace}:{lookup_by(identity)}"`.
///
/// Every write refreshes the hash expiry in the same transaction.
#[derive(Clone)]
pub struct RedisUserStore {
    store: Arc<dyn Store>,
    identity: String,
    namespace: String,
    expire_seconds: u64,
    lookup_by: LookupFn,
}

impl fmt::Debug for RedisUserStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisUserStore")
            .field("key", &self.key())
            .field("expire_seconds", &self.expire_seconds)
            .finish()
    }
}

impl RedisUserStore {
    pub fn new(store: Arc<dyn Store>, identity: impl Into<String>) -> Self {
        let defaults = EngineSettings::default();

        Self {
            store,
            identity: identity.into(),
            namespace: defaults.persistence_namespace,
            expire_seconds: defaults.persistence_expire_seconds,
            lookup_by: Arc::new(|identity: &str| identity.to_string()),
        }
    }

    /// Uses the namespace and expiry configured for the engine
    pub fn from_settings(
        store: Arc<dyn Store>,
        identity: impl Into<String>,
        settings: &EngineSettings,
    ) -> Self {
        Self::new(store, identity)
            .with_namespace(settings.persistence_namespace.clone())
            .with_expire_seconds(settings.persistence_expire_seconds)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_expire_seconds(mut self, seconds: u64) -> Self {
        self.expire_seconds = seconds;
        self
    }

    pub fn with_lookup_by<F>(mut self, lookup_by: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.lookup_by = Arc::new(lookup_by);
        self
    }

    /// Hash key holding this visitor's entries
    pub fn key(&self) -> String {
        format!("{}:{}", self.namespace, (self.lookup_by)(&self.identity))
    }

    fn write_ops(&self, write: StoreOp) -> Vec<StoreOp> {
        vec![write, StoreOp::expire(self.key(), self.expire_seconds)]
    }
}

#[async_trait]
impl UserStore for RedisUserStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        self.store.hget(&self.key(), key).await
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, DomainError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        self.store
            .run(StoreOp::hmget(self.key(), keys.iter().cloned()))
            .await?
            .into_values()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DomainError> {
        self.store
            .transaction(&self.write_ops(StoreOp::hset(self.key(), key, value)))
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, DomainError> {
        let mut replies = self
            .store
            .transaction(&self.write_ops(StoreOp::hset_nx(self.key(), key, value)))
            .await?;

        if replies.is_empty() {
            return Err(DomainError::store("Store returned no reply for HSETNX"));
        }

        replies.swap_remove(0).into_bool()
    }

    async fn delete(&self, keys: &[String]) -> Result<(), DomainError> {
        if keys.is_empty() {
            return Ok(());
        }

        self.store
            .run(StoreOp::hdel(self.key(), keys.iter().cloned()))
            .await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, DomainError> {
        self.store
            .run(StoreOp::hkeys(self.key()))
            .await?
            .into_strings()
    }

    fn transactional_set(&self, key: &str, value: &str) -> Option<Vec<StoreOp>> {
        Some(self.write_ops(StoreOp::hset(self.key(), key, value)))
    }
}
