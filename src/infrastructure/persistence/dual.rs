//! Visitor store switching between logged-in and anonymous backends

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::persistence::UserStore;
use crate::domain::store::StoreOp;
use crate::domain::DomainError;

/// Delegates to the logged-in backend when the visitor is authenticated,
/// otherwise to the anonymous one. The choice is fixed at construction.
#[derive(Debug, Clone)]
pub struct DualUserStore {
    logged_in: Arc<dyn UserStore>,
    anonymous: Arc<dyn UserStore>,
    authenticated: bool,
}

impl DualUserStore {
    pub fn new(
        logged_in: Arc<dyn UserStore>,
        anonymous: Arc<dyn UserStore>,
        authenticated: bool,
    ) -> Self {
        Self {
            logged_in,
            anonymous,
            authenticated,
        }
    }

    fn active(&self) -> &dyn UserStore {
        if self.authenticated {
            self.logged_in.as_ref()
        } else {
            self.anonymous.as_ref()
        }
    }

    /// Copies anonymous entries into the logged-in backend and clears them.
    ///
    /// Entries the logged-in backend already has win. Returns the number of
    /// entries copied.
    pub async fn merge_anonymous(&self) -> Result<usize, DomainError> {
        if !self.authenticated {
            return Ok(0);
        }

        let keys = self.anonymous.keys().await?;
        let values = self.anonymous.multi_get(&keys).await?;
        let mut merged = 0;

        for (key, value) in keys.iter().zip(values) {
            if let Some(value) = value {
                if self.logged_in.set_if_absent(key, &value).await? {
                    merged += 1;
                }
            }
        }

        self.anonymous.delete(&keys).await?;
        debug!(merged, "Merged anonymous visitor entries");

        Ok(merged)
    }
}

#[async_trait]
impl UserStore for DualUserStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        self.active().get(key).await
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, DomainError> {
        self.active().multi_get(keys).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DomainError> {
        self.active().set(key, value).await
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, DomainError> {
        self.active().set_if_absent(key, value).await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), DomainError> {
        self.active().delete(keys).await
    }

    async fn keys(&self) -> Result<Vec<String>, DomainError> {
        self.active().keys().await
    }

    fn transactional_set(&self, key: &str, value: &str) -> Option<Vec<StoreOp>> {
        self.active().transactional_set(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::SessionUserStore;

    fn stores() -> (Arc<SessionUserStore>, Arc<SessionUserStore>) {
        (
            Arc::new(SessionUserStore::new()),
            Arc::new(SessionUserStore::new()),
        )
    }

    #[tokio::test]
    async fn test_routes_to_anonymous_backend() {
        let (logged_in, anonymous) = stores();
        let store = DualUserStore::new(logged_in.clone(), anonymous.clone(), false);

        store.set("color", "red").await.unwrap();

        assert_eq!(anonymous.get("color").await.unwrap(), Some("red".to_string()));
        assert_eq!(logged_in.get("color").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_routes_to_logged_in_backend() {
        let (logged_in, anonymous) = stores();
        let store = DualUserStore::new(logged_in.clone(), anonymous.clone(), true);

        store.set("color", "red").await.unwrap();

        assert_eq!(logged_in.get("color").await.unwrap(), Some("red".to_string()));
        assert!(anonymous.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_keeps_existing_logged_in_entries() {
        let (logged_in, anonymous) = stores();
        logged_in.set("color", "blue").await.unwrap();
        anonymous.set("color", "red").await.unwrap();
        anonymous.set("size", "large").await.unwrap();

        let store = DualUserStore::new(logged_in.clone(), anonymous.clone(), true);
        assert_eq!(store.merge_anonymous().await.unwrap(), 1);

        assert_eq!(store.get("color").await.unwrap(), Some("blue".to_string()));
        assert_eq!(store.get("size").await.unwrap(), Some("large".to_string()));
        assert!(anonymous.keys().await.unwrap().is_empty());
    }
}
