//! Visitor store trait definition

use std::fmt::Debug;

use async_trait::async_trait;

use crate::domain::store::StoreOp;
use crate::domain::DomainError;

/// Key/value storage private to one visitor.
///
/// Keys are experiment keys (`color`, `color:2`), finished flags
/// (`color:finished`) and scored flags (`color:scored:revenue`).
/// Implementations must never leak entries between visitors.
#[async_trait]
pub trait UserStore: Send + Sync + Debug {
    /// Gets a value for the visitor
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Gets several values at once, positionally
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, DomainError> {
        let mut values = Vec::with_capacity(keys.len());

        for key in keys {
            values.push(self.get(key).await?);
        }

        Ok(values)
    }

    /// Sets a value for the visitor
    async fn set(&self, key: &str, value: &str) -> Result<(), DomainError>;

    /// Sets a value only if the key is absent, returning whether it wrote.
    ///
    /// The default implementation is a check followed by a write and is
    /// therefore racy across concurrent requests of the same visitor. A rare
    /// double assignment is tolerated for backends that cannot do better.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, DomainError> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }

        self.set(key, value).await?;
        Ok(true)
    }

    /// Deletes keys; missing keys are ignored
    async fn delete(&self, keys: &[String]) -> Result<(), DomainError>;

    /// Lists all keys held for the visitor
    async fn keys(&self) -> Result<Vec<String>, DomainError>;

    /// Shared-store commands that perform `set(key, value)`.
    ///
    /// Adapters that live inside the shared store return the commands so the
    /// caller can fold the write into a larger transaction. Adapters that
    /// keep state elsewhere return `None`; the caller then runs the shared
    /// transaction first and calls [`UserStore::set`] once it succeeded.
    fn transactional_set(&self, _key: &str, _value: &str) -> Option<Vec<StoreOp>> {
        None
    }
}
