//! Request-scoped visitor store

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::persistence::UserStore;
use crate::domain::DomainError;

/// Visitor store backed by a plain map that lives as long as one request.
///
/// Callers seed it from their session with [`SessionUserStore::from_entries`]
/// and write the state back with [`SessionUserStore::into_entries`].
#[derive(Debug, Default)]
pub struct SessionUserStore {
    entries: Mutex<HashMap<String, String>>,
}

impl SessionUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<String, String>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Consumes the store, returning its entries for the caller's session
    pub fn into_entries(self) -> HashMap<String, String> {
        self.entries
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, DomainError> {
        self.entries
            .lock()
            .map_err(|_| DomainError::internal("Session store lock poisoned"))
    }
}

#[async_trait]
impl UserStore for SessionUserStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, DomainError> {
        let entries = self.lock()?;
        Ok(keys.iter().map(|key| entries.get(key).cloned()).collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DomainError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, DomainError> {
        let mut entries = self.lock()?;

        if entries.contains_key(key) {
            return Ok(false);
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn delete(&self, keys: &[String]) -> Result<(), DomainError> {
        let mut entries = self.lock()?;

        for key in keys {
            entries.remove(key);
        }

        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, DomainError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
